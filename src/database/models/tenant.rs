use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One onboarded clinic, as persisted in the registry database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TenantRecord {
    pub id: Uuid,
    pub display_name: String,
    pub slug: String,
    /// Store name of the clinic's isolated database. Never changes.
    pub store_locator: String,
    pub owner_email: String,
    pub join_code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public view handed to joiners and discovery clients; hides the locator and owner.
#[derive(Debug, Clone, Serialize)]
pub struct TenantSummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub join_code: String,
}

impl From<&TenantRecord> for TenantSummary {
    fn from(tenant: &TenantRecord) -> Self {
        Self {
            id: tenant.id,
            name: tenant.display_name.clone(),
            slug: tenant.slug.clone(),
            join_code: tenant.join_code.clone(),
        }
    }
}

/// Search result entry. Join codes are only shared by clinic staff.
#[derive(Debug, Clone, Serialize)]
pub struct ClinicListing {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

impl From<&TenantRecord> for ClinicListing {
    fn from(tenant: &TenantRecord) -> Self {
        Self {
            id: tenant.id,
            name: tenant.display_name.clone(),
            slug: tenant.slug.clone(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SuperAdminRecord {
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
