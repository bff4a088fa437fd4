use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::database::driver::{ReadyState, StoreDriver, StoreHandle};
use crate::database::models::EntityName;

/// Errors from the tenant store layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid tenant store locator: {0}")]
    InvalidLocator(String),

    #[error("Tenant store {locator} unreachable: {message}")]
    Connection { locator: String, message: String },

    #[error("Timed out after {seconds}s connecting to tenant store {locator}")]
    ConnectionTimeout { locator: String, seconds: u64 },

    #[error("Connection to tenant store is closed")]
    ConnectionClosed,

    #[error("Failed to bind {entity} schema: {message}")]
    SchemaBinding { entity: EntityName, message: String },

    #[error("{entity} with this {field} already exists")]
    Duplicate { entity: EntityName, field: String },

    #[error("Invalid {entity} document: {message}")]
    Validation { entity: EntityName, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Store unreachable or too slow; the caller may retry on the next request.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            DatabaseError::Connection { .. }
                | DatabaseError::ConnectionTimeout { .. }
                | DatabaseError::ConnectionClosed
        )
    }
}

/// Locators double as database names, so only a safe identifier shape is accepted:
/// `tenant_` followed by `[a-zA-Z0-9_]+`, at most 63 bytes.
pub fn is_valid_locator(locator: &str) -> bool {
    locator.len() > "tenant_".len()
        && locator.len() <= 63
        && locator.starts_with("tenant_")
        && locator.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Live handle to one tenant store, shared by every request resolving to that tenant.
#[derive(Clone)]
pub struct TenantConnection {
    id: u64,
    locator: Arc<str>,
    handle: Arc<dyn StoreHandle>,
}

impl TenantConnection {
    /// Serial number assigned at establishment; a recreated connection gets a new one.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn handle(&self) -> &Arc<dyn StoreHandle> {
        &self.handle
    }

    pub fn ready_state(&self) -> ReadyState {
        self.handle.ready_state()
    }
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("id", &self.id)
            .field("locator", &self.locator)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

type Slot = Arc<Mutex<Option<TenantConnection>>>;

/// Process-wide cache of tenant store connections keyed by locator.
///
/// Each locator owns a slot guarded by an async mutex, so concurrent first
/// access for one tenant results in a single connection attempt while other
/// tenants proceed independently. A failed attempt leaves the slot empty.
pub struct ConnectionCache {
    driver: Arc<dyn StoreDriver>,
    connect_timeout: Duration,
    slots: RwLock<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

impl ConnectionCache {
    pub fn new(driver: Arc<dyn StoreDriver>, connect_timeout: Duration) -> Self {
        Self {
            driver,
            connect_timeout,
            slots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn driver(&self) -> &Arc<dyn StoreDriver> {
        &self.driver
    }

    /// Get a live connection for `locator`, establishing or repairing it as needed
    pub async fn get_connection(&self, locator: &str) -> Result<TenantConnection, DatabaseError> {
        if !is_valid_locator(locator) {
            return Err(DatabaseError::InvalidLocator(locator.to_string()));
        }

        let slot = self.slot(locator).await;
        let mut entry = slot.lock().await;

        if let Some(connection) = entry.as_ref() {
            match connection.ready_state() {
                ReadyState::Ready => {
                    debug!("Reusing tenant store connection for: {}", locator);
                    return Ok(connection.clone());
                }
                state => {
                    warn!(
                        "Cached connection {} for {} is {}; reconnecting",
                        connection.id, locator, state
                    );
                }
            }
        }

        if let Some(stale) = entry.take() {
            stale.handle.close().await;
        }

        let connection = self.establish(locator).await?;
        *entry = Some(connection.clone());
        Ok(connection)
    }

    async fn establish(&self, locator: &str) -> Result<TenantConnection, DatabaseError> {
        let address = self.driver.address_for(locator)?;

        let handle = match tokio::time::timeout(self.connect_timeout, self.driver.open(&address)).await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                warn!("Failed to connect to tenant store {}: {}", locator, e);
                return Err(match e {
                    DatabaseError::Connection { .. } => e,
                    other => DatabaseError::Connection {
                        locator: locator.to_string(),
                        message: other.to_string(),
                    },
                });
            }
            Err(_) => {
                warn!(
                    "Connecting to tenant store {} exceeded {:?}",
                    locator, self.connect_timeout
                );
                return Err(DatabaseError::ConnectionTimeout {
                    locator: locator.to_string(),
                    seconds: self.connect_timeout.as_secs(),
                });
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "Established {} connection {} for tenant store: {}",
            self.driver.name(),
            id,
            locator
        );

        Ok(TenantConnection {
            id,
            locator: Arc::from(locator),
            handle,
        })
    }

    async fn slot(&self, locator: &str) -> Slot {
        // Fast path: try read lock
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(locator) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write().await;
        slots.entry(locator.to_string()).or_default().clone()
    }

    /// Locators that currently hold an established connection
    pub async fn cached_locators(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = {
            let slots = self.slots.read().await;
            slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut locators = Vec::new();
        for (locator, slot) in slots {
            if slot.lock().await.is_some() {
                locators.push(locator);
            }
        }
        locators.sort();
        locators
    }

    /// Close and remove all connections (e.g., on shutdown)
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.slots.write().await.drain().collect();
        join_all(drained.into_iter().map(|(locator, slot)| async move {
            if let Some(connection) = slot.lock().await.take() {
                connection.handle.close().await;
                info!("Closed tenant store connection: {}", locator);
            }
        }))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDriver;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    /// Wraps the memory engine with open latency and an outage switch.
    struct FlakyDriver {
        inner: MemoryDriver,
        latency: Duration,
        unreachable: AtomicBool,
    }

    impl FlakyDriver {
        fn new(latency: Duration) -> Self {
            Self {
                inner: MemoryDriver::new(),
                latency,
                unreachable: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl StoreDriver for FlakyDriver {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn address_for(&self, locator: &str) -> Result<String, DatabaseError> {
            self.inner.address_for(locator)
        }

        async fn open(&self, address: &str) -> Result<Arc<dyn StoreHandle>, DatabaseError> {
            tokio::time::sleep(self.latency).await;
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(DatabaseError::ConfigMissing("store host"));
            }
            self.inner.open(address).await
        }

        async fn provision(&self, locator: &str) -> Result<(), DatabaseError> {
            self.inner.provision(locator).await
        }
    }

    #[test]
    fn validates_locators() {
        assert!(is_valid_locator("tenant_sunrise_clinic_1700000000000_ab12"));
        assert!(!is_valid_locator("tenant_"));
        assert!(!is_valid_locator("clinic_registry"));
        assert!(!is_valid_locator("tenant-123"));
        assert!(!is_valid_locator("tenant_; DROP DATABASE"));
        assert!(!is_valid_locator(&format!("tenant_{}", "a".repeat(60))));
    }

    #[tokio::test]
    async fn concurrent_first_access_opens_once() {
        let driver = Arc::new(FlakyDriver::new(Duration::from_millis(50)));
        let cache = Arc::new(ConnectionCache::new(driver.clone(), Duration::from_secs(5)));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_connection("tenant_alpha").await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id());
        }

        assert_eq!(driver.inner.open_count(), 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[tokio::test]
    async fn different_tenants_get_distinct_connections() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = ConnectionCache::new(driver.clone(), Duration::from_secs(5));

        let a = cache.get_connection("tenant_alpha").await.unwrap();
        let b = cache.get_connection("tenant_beta").await.unwrap();
        let a_again = cache.get_connection("tenant_alpha").await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a_again.id());
        assert_eq!(driver.open_count(), 2);
        assert_eq!(cache.cached_locators().await, vec!["tenant_alpha", "tenant_beta"]);
    }

    #[tokio::test]
    async fn closed_handle_is_reestablished() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = ConnectionCache::new(driver.clone(), Duration::from_secs(5));

        let first = cache.get_connection("tenant_alpha").await.unwrap();
        first.handle().close().await;
        assert_eq!(first.ready_state(), ReadyState::Closed);

        let second = cache.get_connection("tenant_alpha").await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.ready_state(), ReadyState::Ready);
        assert_eq!(driver.open_count(), 2);
    }

    #[tokio::test]
    async fn failed_connect_does_not_poison_cache() {
        let driver = Arc::new(FlakyDriver::new(Duration::ZERO));
        let cache = ConnectionCache::new(driver.clone(), Duration::from_secs(5));

        driver.unreachable.store(true, Ordering::SeqCst);
        let err = cache.get_connection("tenant_alpha").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Connection { .. }));
        assert!(cache.cached_locators().await.is_empty());

        driver.unreachable.store(false, Ordering::SeqCst);
        let connection = cache.get_connection("tenant_alpha").await.unwrap();
        assert_eq!(connection.ready_state(), ReadyState::Ready);
    }

    #[tokio::test]
    async fn slow_connect_times_out_and_leaves_slot_empty() {
        let driver = Arc::new(FlakyDriver::new(Duration::from_millis(200)));
        let cache = ConnectionCache::new(driver.clone(), Duration::from_millis(20));

        let err = cache.get_connection("tenant_alpha").await.unwrap_err();
        assert!(matches!(err, DatabaseError::ConnectionTimeout { .. }));
        assert!(err.is_connection_failure());
        assert!(cache.cached_locators().await.is_empty());
    }

    #[tokio::test]
    async fn rejects_unsafe_locator_without_connecting() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = ConnectionCache::new(driver.clone(), Duration::from_secs(5));

        let err = cache.get_connection("postgres").await.unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidLocator(_)));
        assert_eq!(driver.open_count(), 0);
    }

    #[tokio::test]
    async fn close_all_empties_cache() {
        let driver = Arc::new(MemoryDriver::new());
        let cache = ConnectionCache::new(driver, Duration::from_secs(5));
        let connection = cache.get_connection("tenant_alpha").await.unwrap();

        cache.close_all().await;
        assert_eq!(connection.ready_state(), ReadyState::Closed);
        assert!(cache.cached_locators().await.is_empty());
    }
}
