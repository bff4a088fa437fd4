//! Minimal contract the tenant routing layer needs from a store engine.
//!
//! The connection cache and model factory are written against these traits
//! only, so the Postgres engine and the in-memory engine are interchangeable.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::EntitySchema;

/// Schema-less document exchanged with entity accessors.
pub type Document = Map<String, Value>;

/// Fields owned by the accessor; client-supplied values are discarded.
pub const SYSTEM_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Liveness of a store handle, used to decide reuse vs. recreate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Ready,
    Closed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::Connecting => write!(f, "connecting"),
            ReadyState::Ready => write!(f, "ready"),
            ReadyState::Closed => write!(f, "closed"),
        }
    }
}

#[async_trait]
pub trait StoreDriver: Send + Sync {
    /// Engine name for logs and health output.
    fn name(&self) -> &'static str;

    /// Base address with the locator substituted as the store name.
    fn address_for(&self, locator: &str) -> Result<String, DatabaseError>;

    /// Establish a live connection to `address`.
    async fn open(&self, address: &str) -> Result<Arc<dyn StoreHandle>, DatabaseError>;

    /// Make sure the isolated store for `locator` physically exists.
    async fn provision(&self, locator: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait StoreHandle: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Register `schema` against this connection and return its accessor.
    async fn bind(&self, schema: &'static EntitySchema)
        -> Result<Arc<dyn EntityAccessor>, DatabaseError>;

    async fn close(&self);
}

/// CRUD over one entity collection inside one tenant store.
#[async_trait]
pub trait EntityAccessor: Send + Sync {
    fn schema(&self) -> &'static EntitySchema;

    async fn insert(&self, doc: Document) -> Result<Document, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, DatabaseError>;

    /// Documents whose top-level fields equal every field in `filter`.
    async fn find(&self, filter: &Document, limit: Option<i64>)
        -> Result<Vec<Document>, DatabaseError>;

    async fn find_one(&self, filter: &Document) -> Result<Option<Document>, DatabaseError> {
        Ok(self.find(filter, Some(1)).await?.into_iter().next())
    }

    /// Shallow-merge `patch` into the stored document.
    async fn update(&self, id: Uuid, patch: Document) -> Result<Option<Document>, DatabaseError>;

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn count(&self, filter: &Document) -> Result<i64, DatabaseError>;
}

/// Drop system fields so callers can never overwrite them.
pub fn strip_system_fields(mut doc: Document) -> Document {
    for field in SYSTEM_FIELDS {
        doc.remove(field);
    }
    doc
}

/// Attach system fields to stored document data.
pub fn with_system_fields(
    mut data: Document,
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Document {
    data.insert("id".to_string(), Value::String(id.to_string()));
    data.insert(
        "created_at".to_string(),
        Value::String(created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    data.insert(
        "updated_at".to_string(),
        Value::String(updated_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    data
}

/// Read the `id` system field back out of a document.
pub fn document_id(doc: &Document) -> Option<Uuid> {
    doc.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Unique fields compare case-insensitively when they hold strings.
pub fn unique_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_lowercase()),
        other => Some(other.to_string()),
    }
}
