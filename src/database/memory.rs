//! Process-local store engine for development and tests.
//!
//! Data lives as long as the driver; reopening an address sees the same
//! collections. Handles refuse to register a schema twice, matching engines
//! where double model registration is an error.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::database::driver::{
    document_id, strip_system_fields, unique_key, with_system_fields, Document, EntityAccessor,
    ReadyState, StoreDriver, StoreHandle,
};
use crate::database::manager::DatabaseError;
use crate::database::models::EntitySchema;

const SCHEME: &str = "memory://";

#[derive(Default)]
pub struct MemoryDriver {
    databases: DashMap<String, Arc<MemoryDatabase>>,
    opens: AtomicUsize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        self.databases
            .entry(name.to_string())
            .or_default()
            .value()
            .clone()
    }
}

#[async_trait]
impl StoreDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn address_for(&self, locator: &str) -> Result<String, DatabaseError> {
        Ok(format!("{SCHEME}{locator}"))
    }

    async fn open(&self, address: &str) -> Result<Arc<dyn StoreHandle>, DatabaseError> {
        let name = address
            .strip_prefix(SCHEME)
            .filter(|name| !name.is_empty())
            .ok_or(DatabaseError::InvalidDatabaseUrl)?;

        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryHandle {
            database: self.database(name),
            closed: Arc::new(AtomicBool::new(false)),
            bound: Mutex::new(HashSet::new()),
        }))
    }

    async fn provision(&self, locator: &str) -> Result<(), DatabaseError> {
        self.database(locator);
        Ok(())
    }
}

#[derive(Default)]
struct MemoryDatabase {
    collections: DashMap<&'static str, Arc<RwLock<Vec<Document>>>>,
}

pub struct MemoryHandle {
    database: Arc<MemoryDatabase>,
    closed: Arc<AtomicBool>,
    bound: Mutex<HashSet<&'static str>>,
}

#[async_trait]
impl StoreHandle for MemoryHandle {
    fn ready_state(&self) -> ReadyState {
        if self.closed.load(Ordering::SeqCst) {
            ReadyState::Closed
        } else {
            ReadyState::Ready
        }
    }

    async fn bind(
        &self,
        schema: &'static EntitySchema,
    ) -> Result<Arc<dyn EntityAccessor>, DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionClosed);
        }

        if !self.bound.lock().await.insert(schema.collection) {
            return Err(DatabaseError::SchemaBinding {
                entity: schema.name,
                message: "schema already registered on this connection".to_string(),
            });
        }

        let rows = self
            .database
            .collections
            .entry(schema.collection)
            .or_default()
            .value()
            .clone();

        Ok(Arc::new(MemoryAccessor {
            schema,
            rows,
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct MemoryAccessor {
    schema: &'static EntitySchema,
    rows: Arc<RwLock<Vec<Document>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryAccessor {
    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DatabaseError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Unique field of `candidate` already held by a row other than `except`.
    fn conflicting_field(
        &self,
        rows: &[Document],
        candidate: &Document,
        except: Option<Uuid>,
    ) -> Option<&'static str> {
        self.schema.unique.iter().copied().find(|field| {
            let Some(key) = candidate.get(*field).and_then(unique_key) else {
                return false;
            };
            rows.iter()
                .filter(|row| except.is_none() || document_id(row) != except)
                .any(|row| row.get(*field).and_then(unique_key).as_deref() == Some(key.as_str()))
        })
    }
}

fn matches(row: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| row.get(k) == Some(v))
}

#[async_trait]
impl EntityAccessor for MemoryAccessor {
    fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    async fn insert(&self, doc: Document) -> Result<Document, DatabaseError> {
        self.ensure_open()?;
        let data = strip_system_fields(doc);
        if let Some(field) = self.schema.missing_required(&data) {
            return Err(DatabaseError::Validation {
                entity: self.schema.name,
                message: format!("missing required field '{field}'"),
            });
        }

        let mut rows = self.rows.write().await;
        if let Some(field) = self.conflicting_field(&rows, &data, None) {
            return Err(DatabaseError::Duplicate {
                entity: self.schema.name,
                field: field.to_string(),
            });
        }

        let now = Utc::now();
        let doc = with_system_fields(data, Uuid::new_v4(), now, now);
        rows.push(doc.clone());
        Ok(doc)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        self.ensure_open()?;
        let rows = self.rows.read().await;
        Ok(rows.iter().find(|row| document_id(row) == Some(id)).cloned())
    }

    async fn find(
        &self,
        filter: &Document,
        limit: Option<i64>,
    ) -> Result<Vec<Document>, DatabaseError> {
        self.ensure_open()?;
        let limit = limit.map_or(usize::MAX, |n| n.max(0) as usize);
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|row| matches(row, filter))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, id: Uuid, patch: Document) -> Result<Option<Document>, DatabaseError> {
        self.ensure_open()?;
        let patch = strip_system_fields(patch);

        let mut rows = self.rows.write().await;
        if let Some(field) = self.conflicting_field(&rows, &patch, Some(id)) {
            return Err(DatabaseError::Duplicate {
                entity: self.schema.name,
                field: field.to_string(),
            });
        }

        let Some(row) = rows.iter_mut().find(|row| document_id(row) == Some(id)) else {
            return Ok(None);
        };
        row.extend(patch);
        let created = created_at(row);
        let refreshed = with_system_fields(strip_system_fields(row.clone()), id, created, Utc::now());
        *row = refreshed.clone();
        Ok(Some(refreshed))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.ensure_open()?;
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|row| document_id(row) != Some(id));
        Ok(rows.len() != before)
    }

    async fn count(&self, filter: &Document) -> Result<i64, DatabaseError> {
        self.ensure_open()?;
        let rows = self.rows.read().await;
        Ok(rows.iter().filter(|row| matches(row, filter)).count() as i64)
    }
}

fn created_at(row: &Document) -> chrono::DateTime<Utc> {
    row.get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::EntityName;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    async fn users(
        driver: &MemoryDriver,
        locator: &str,
    ) -> (Arc<dyn StoreHandle>, Arc<dyn EntityAccessor>) {
        let handle = driver.open(&driver.address_for(locator).unwrap()).await.unwrap();
        let accessor = handle.bind(EntityName::User.schema()).await.unwrap();
        (handle, accessor)
    }

    fn user(email: &str) -> Document {
        doc(json!({"email": email, "role": "doctor", "password_hash": "x"}))
    }

    #[tokio::test]
    async fn insert_assigns_system_fields() {
        let driver = MemoryDriver::new();
        let (_, users) = users(&driver, "tenant_a").await;

        let mut input = user("a@x.com");
        input.insert("id".into(), json!("forged"));
        let stored = users.insert(input).await.unwrap();

        let id = document_id(&stored).unwrap();
        assert_eq!(users.find_by_id(id).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn unique_fields_are_case_insensitive_per_store() {
        let driver = MemoryDriver::new();
        let (_, t1) = users(&driver, "tenant_one").await;
        let (_, t2) = users(&driver, "tenant_two").await;

        t1.insert(user("a@x.com")).await.unwrap();
        t2.insert(user("a@x.com")).await.unwrap();

        let err = t1.insert(user("A@X.com")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref field, .. } if field == "email"));

        let err = t1.insert(user(" a@x.com ")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { .. }));
        assert_eq!(t1.count(&Document::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rejects_missing_required_fields() {
        let driver = MemoryDriver::new();
        let (_, users) = users(&driver, "tenant_a").await;

        let err = users.insert(doc(json!({"email": "a@x.com"}))).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Validation { .. }));
    }

    #[tokio::test]
    async fn update_merges_and_find_filters() {
        let driver = MemoryDriver::new();
        let (_, users) = users(&driver, "tenant_a").await;
        let stored = users.insert(user("a@x.com")).await.unwrap();
        users.insert(user("b@x.com")).await.unwrap();
        let id = document_id(&stored).unwrap();

        let updated = users
            .update(id, doc(json!({"name": "Ada", "created_at": "1999"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["name"], json!("Ada"));
        assert_eq!(updated["created_at"], stored["created_at"]);

        let found = users.find(&doc(json!({"name": "Ada"})), None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(users.find(&Document::new(), Some(1)).await.unwrap().len(), 1);

        assert!(users.delete(id).await.unwrap());
        assert!(!users.delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn reopen_sees_same_data_and_double_bind_fails() {
        let driver = MemoryDriver::new();
        let (handle, users_a) = users(&driver, "tenant_a").await;
        users_a.insert(user("a@x.com")).await.unwrap();

        let err = handle.bind(EntityName::User.schema()).await.err().unwrap();
        assert!(matches!(err, DatabaseError::SchemaBinding { .. }));

        handle.close().await;
        assert!(matches!(
            users_a.count(&Document::new()).await,
            Err(DatabaseError::ConnectionClosed)
        ));

        let (_, users_b) = users(&driver, "tenant_a").await;
        assert_eq!(users_b.count(&Document::new()).await.unwrap(), 1);
        assert_eq!(driver.open_count(), 2);
    }
}
