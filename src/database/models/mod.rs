//! The fixed entity schema list bound into every tenant store.
//!
//! Every clinic sees exactly this set; adding an entity means bumping
//! [`SCHEMA_VERSION`] and redeploying.

pub mod tenant;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::driver::Document;

pub use tenant::{ClinicListing, SuperAdminRecord, TenantRecord, TenantSummary};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityName {
    User,
    Appointment,
    Invoice,
    Medication,
    MedicalRecord,
    Report,
    Ticket,
    HealthMetric,
    PharmacyItem,
    PharmacyTransaction,
    InventoryItem,
    ServiceItem,
    ActivityLog,
    Announcement,
    Conversation,
    Message,
    Call,
    DoctorDetail,
    PatientDetail,
    EmailPreference,
    Settings,
    AiChatSession,
    ClinicProfile,
}

impl EntityName {
    pub const ALL: [EntityName; 23] = [
        EntityName::User,
        EntityName::Appointment,
        EntityName::Invoice,
        EntityName::Medication,
        EntityName::MedicalRecord,
        EntityName::Report,
        EntityName::Ticket,
        EntityName::HealthMetric,
        EntityName::PharmacyItem,
        EntityName::PharmacyTransaction,
        EntityName::InventoryItem,
        EntityName::ServiceItem,
        EntityName::ActivityLog,
        EntityName::Announcement,
        EntityName::Conversation,
        EntityName::Message,
        EntityName::Call,
        EntityName::DoctorDetail,
        EntityName::PatientDetail,
        EntityName::EmailPreference,
        EntityName::Settings,
        EntityName::AiChatSession,
        EntityName::ClinicProfile,
    ];

    pub fn as_str(&self) -> &'static str {
        self.schema().name_str
    }

    pub fn collection(&self) -> &'static str {
        self.schema().collection
    }

    pub fn schema(&self) -> &'static EntitySchema {
        &SCHEMAS[*self as usize]
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown entity: {0}")]
pub struct UnknownEntity(pub String);

impl FromStr for EntityName {
    type Err = UnknownEntity;

    /// Accepts the logical name ("MedicalRecord") or the collection name ("medical_records").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityName::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s) || e.collection() == s)
            .ok_or_else(|| UnknownEntity(s.to_string()))
    }
}

/// User fields that never leave the tenant store through the API.
pub const USER_SECRET_FIELDS: [&str; 2] = ["password_hash", "verification_code"];

/// Copy of a `User` document safe to return to clients.
pub fn redact_user(mut doc: Document) -> Document {
    for field in USER_SECRET_FIELDS {
        doc.remove(field);
    }
    doc
}

/// Static description of one entity collection.
#[derive(Debug)]
pub struct EntitySchema {
    pub name: EntityName,
    name_str: &'static str,
    /// Table/collection name inside the tenant store.
    pub collection: &'static str,
    /// Enforced case-insensitively within one tenant store.
    pub unique: &'static [&'static str],
    pub required: &'static [&'static str],
}

impl EntitySchema {
    const fn new(name: EntityName, name_str: &'static str, collection: &'static str) -> Self {
        Self {
            name,
            name_str,
            collection,
            unique: &[],
            required: &[],
        }
    }

    const fn unique(mut self, fields: &'static [&'static str]) -> Self {
        self.unique = fields;
        self
    }

    const fn required(mut self, fields: &'static [&'static str]) -> Self {
        self.required = fields;
        self
    }

    /// First required field that is absent or null.
    pub fn missing_required(&self, doc: &Document) -> Option<&'static str> {
        self.required
            .iter()
            .copied()
            .find(|field| matches!(doc.get(*field), None | Some(Value::Null)))
    }
}

/// Indexed by `EntityName as usize`.
pub static SCHEMAS: [EntitySchema; 23] = [
    EntitySchema::new(EntityName::User, "User", "users")
        .unique(&["email"])
        .required(&["email", "role", "password_hash"]),
    EntitySchema::new(EntityName::Appointment, "Appointment", "appointments"),
    EntitySchema::new(EntityName::Invoice, "Invoice", "invoices"),
    EntitySchema::new(EntityName::Medication, "Medication", "medications"),
    EntitySchema::new(EntityName::MedicalRecord, "MedicalRecord", "medical_records"),
    EntitySchema::new(EntityName::Report, "Report", "reports"),
    EntitySchema::new(EntityName::Ticket, "Ticket", "tickets"),
    EntitySchema::new(EntityName::HealthMetric, "HealthMetric", "health_metrics"),
    EntitySchema::new(EntityName::PharmacyItem, "PharmacyItem", "pharmacy_items"),
    EntitySchema::new(
        EntityName::PharmacyTransaction,
        "PharmacyTransaction",
        "pharmacy_transactions",
    ),
    EntitySchema::new(EntityName::InventoryItem, "InventoryItem", "inventory_items"),
    EntitySchema::new(EntityName::ServiceItem, "ServiceItem", "service_items"),
    EntitySchema::new(EntityName::ActivityLog, "ActivityLog", "activity_logs")
        .required(&["action"]),
    EntitySchema::new(EntityName::Announcement, "Announcement", "announcements"),
    EntitySchema::new(EntityName::Conversation, "Conversation", "conversations"),
    EntitySchema::new(EntityName::Message, "Message", "messages"),
    EntitySchema::new(EntityName::Call, "Call", "calls"),
    EntitySchema::new(EntityName::DoctorDetail, "DoctorDetail", "doctor_details")
        .unique(&["user_id"])
        .required(&["user_id"]),
    EntitySchema::new(EntityName::PatientDetail, "PatientDetail", "patient_details")
        .unique(&["user_id"])
        .required(&["user_id"]),
    EntitySchema::new(EntityName::EmailPreference, "EmailPreference", "email_preferences")
        .unique(&["user_id"]),
    EntitySchema::new(EntityName::Settings, "Settings", "settings"),
    EntitySchema::new(EntityName::AiChatSession, "AiChatSession", "ai_chat_sessions"),
    EntitySchema::new(EntityName::ClinicProfile, "ClinicProfile", "clinic_profiles")
        .required(&["name"]),
];
