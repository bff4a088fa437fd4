use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::database::driver::EntityAccessor;
use crate::database::manager::{DatabaseError, TenantConnection};
use crate::database::models::{EntityName, SCHEMA_VERSION};

/// Every entity accessor bound to one tenant connection.
pub struct EntitySet {
    locator: String,
    connection_id: u64,
    accessors: Vec<Arc<dyn EntityAccessor>>,
}

impl EntitySet {
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Connection the accessors were bound against.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn get(&self, entity: EntityName) -> &Arc<dyn EntityAccessor> {
        &self.accessors[entity as usize]
    }

    pub fn users(&self) -> &Arc<dyn EntityAccessor> {
        self.get(EntityName::User)
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

impl std::fmt::Debug for EntitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySet")
            .field("locator", &self.locator)
            .field("connection_id", &self.connection_id)
            .field("entities", &self.accessors.len())
            .finish()
    }
}

type Slot = Arc<Mutex<Option<Arc<EntitySet>>>>;

/// Binds the full entity schema list once per tenant connection and caches the result.
///
/// The set is rebound when the cache hands out a new connection for the same
/// locator. Binding is all-or-nothing: a partial failure caches nothing.
#[derive(Default)]
pub struct ModelFactory {
    slots: RwLock<HashMap<String, Slot>>,
}

impl ModelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_entity_set(
        &self,
        connection: &TenantConnection,
    ) -> Result<Arc<EntitySet>, DatabaseError> {
        let slot = self.slot(connection.locator()).await;
        let mut entry = slot.lock().await;

        if let Some(set) = entry.as_ref() {
            if set.connection_id == connection.id() {
                debug!("Reusing entity set for: {}", connection.locator());
                return Ok(set.clone());
            }
            // Connection ids only grow; a caller holding an older connection
            // gets the set bound to its replacement.
            if set.connection_id > connection.id() {
                debug!(
                    "Stale connection {} for {}; serving set bound to {}",
                    connection.id(),
                    connection.locator(),
                    set.connection_id
                );
                return Ok(set.clone());
            }
            debug!(
                "Connection for {} changed ({} -> {}); rebinding entities",
                connection.locator(),
                set.connection_id,
                connection.id()
            );
        }

        let set = Arc::new(Self::bind_all(connection).await?);
        info!(
            "Bound {} entities (schema v{}) for tenant store: {}",
            set.len(),
            SCHEMA_VERSION,
            connection.locator()
        );
        *entry = Some(set.clone());
        Ok(set)
    }

    async fn bind_all(connection: &TenantConnection) -> Result<EntitySet, DatabaseError> {
        let mut accessors = Vec::with_capacity(EntityName::ALL.len());
        for entity in EntityName::ALL {
            match connection.handle().bind(entity.schema()).await {
                Ok(accessor) => accessors.push(accessor),
                Err(e) => {
                    warn!(
                        "Failed to bind {} for tenant store {}: {}",
                        entity,
                        connection.locator(),
                        e
                    );
                    return Err(match e {
                        DatabaseError::SchemaBinding { .. } => e,
                        e if e.is_connection_failure() => e,
                        other => DatabaseError::SchemaBinding {
                            entity,
                            message: other.to_string(),
                        },
                    });
                }
            }
        }

        Ok(EntitySet {
            locator: connection.locator().to_string(),
            connection_id: connection.id(),
            accessors,
        })
    }

    async fn slot(&self, locator: &str) -> Slot {
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(locator) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().await;
        slots.entry(locator.to_string()).or_default().clone()
    }

    /// Drop every cached set (the connections themselves are owned by the cache)
    pub async fn clear(&self) {
        self.slots.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::driver::{Document, StoreDriver};
    use crate::database::manager::ConnectionCache;
    use crate::database::memory::MemoryDriver;
    use serde_json::json;
    use std::time::Duration;

    fn cache(driver: Arc<MemoryDriver>) -> ConnectionCache {
        ConnectionCache::new(driver, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn binds_every_entity_once_per_connection() {
        let cache = cache(Arc::new(MemoryDriver::new()));
        let factory = ModelFactory::new();
        let connection = cache.get_connection("tenant_alpha").await.unwrap();

        let first = factory.get_entity_set(&connection).await.unwrap();
        let second = factory.get_entity_set(&connection).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), EntityName::ALL.len());
        for entity in EntityName::ALL {
            assert_eq!(first.get(entity).schema().name, entity);
        }
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_binding() {
        let cache = cache(Arc::new(MemoryDriver::new()));
        let factory = Arc::new(ModelFactory::new());
        let connection = cache.get_connection("tenant_alpha").await.unwrap();

        // The memory engine rejects a second bind of the same schema, so any
        // duplicate binding would surface as an error here.
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let factory = factory.clone();
                let connection = connection.clone();
                tokio::spawn(async move { factory.get_entity_set(&connection).await })
            })
            .collect();

        let mut sets = Vec::new();
        for task in tasks {
            sets.push(task.await.unwrap().unwrap());
        }
        assert!(sets.iter().all(|s| Arc::ptr_eq(s, &sets[0])));
    }

    #[tokio::test]
    async fn rebinds_after_reconnect_and_keeps_data() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = cache(driver.clone());
        let factory = ModelFactory::new();

        let connection = cache.get_connection("tenant_alpha").await.unwrap();
        let set = factory.get_entity_set(&connection).await.unwrap();
        let Some(doc) = json!({"name": "Sunrise"}).as_object().cloned() else {
            unreachable!()
        };
        set.get(EntityName::ClinicProfile).insert(doc).await.unwrap();

        connection.handle().close().await;
        let reconnected = cache.get_connection("tenant_alpha").await.unwrap();
        let rebound = factory.get_entity_set(&reconnected).await.unwrap();

        assert!(!Arc::ptr_eq(&set, &rebound));
        assert_eq!(rebound.connection_id(), reconnected.id());
        let profiles = rebound.get(EntityName::ClinicProfile);
        assert_eq!(profiles.count(&Document::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn tenants_get_isolated_sets() {
        let cache = cache(Arc::new(MemoryDriver::new()));
        let factory = ModelFactory::new();

        let a = factory
            .get_entity_set(&cache.get_connection("tenant_alpha").await.unwrap())
            .await
            .unwrap();
        let b = factory
            .get_entity_set(&cache.get_connection("tenant_beta").await.unwrap())
            .await
            .unwrap();

        let Some(user) = json!({"email": "a@x.com", "role": "admin", "password_hash": "h"})
            .as_object()
            .cloned()
        else {
            unreachable!()
        };
        a.users().insert(user).await.unwrap();

        assert_eq!(a.locator(), "tenant_alpha");
        assert_eq!(b.users().count(&Document::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_connection_keeps_newer_binding() {
        let cache = cache(Arc::new(MemoryDriver::new()));
        let factory = ModelFactory::new();

        let old = cache.get_connection("tenant_alpha").await.unwrap();
        factory.get_entity_set(&old).await.unwrap();
        old.handle().close().await;

        let live = cache.get_connection("tenant_alpha").await.unwrap();
        assert!(live.id() > old.id());
        let bound = factory.get_entity_set(&live).await.unwrap();

        // A request still holding the closed connection arrives late
        let late = factory.get_entity_set(&old).await.unwrap();
        assert!(Arc::ptr_eq(&late, &bound));

        for _ in 0..3 {
            let again = factory.get_entity_set(&live).await.unwrap();
            assert!(Arc::ptr_eq(&again, &bound));
        }
    }

    #[tokio::test]
    async fn failed_rebind_keeps_previous_set() {
        let cache = cache(Arc::new(MemoryDriver::new()));
        let factory = ModelFactory::new();

        let first = cache.get_connection("tenant_alpha").await.unwrap();
        let bound = factory.get_entity_set(&first).await.unwrap();
        first.handle().close().await;

        let second = cache.get_connection("tenant_alpha").await.unwrap();
        second
            .handle()
            .bind(EntityName::Invoice.schema())
            .await
            .unwrap();
        assert!(factory.get_entity_set(&second).await.is_err());

        let kept = factory.get_entity_set(&first).await.unwrap();
        assert!(Arc::ptr_eq(&kept, &bound));
    }

    #[tokio::test]
    async fn failed_binding_caches_nothing() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = cache(driver.clone());
        let factory = ModelFactory::new();

        let connection = cache.get_connection("tenant_alpha").await.unwrap();
        // Pre-register one schema so the full binding collides part way through
        connection
            .handle()
            .bind(EntityName::Invoice.schema())
            .await
            .unwrap();

        let err = factory.get_entity_set(&connection).await.unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::SchemaBinding { entity: EntityName::Invoice, .. }
        ));

        // A fresh connection binds cleanly
        connection.handle().close().await;
        let fresh = cache.get_connection("tenant_alpha").await.unwrap();
        let set = factory.get_entity_set(&fresh).await.unwrap();
        assert_eq!(set.len(), EntityName::ALL.len());
        assert_eq!(driver.name(), "memory");
    }
}
