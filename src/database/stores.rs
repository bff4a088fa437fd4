use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::database::driver::StoreDriver;
use crate::database::factory::{EntitySet, ModelFactory};
use crate::database::manager::{ConnectionCache, DatabaseError, TenantConnection};

/// Connection plus bound entities for one tenant, as attached to a request.
#[derive(Clone, Debug)]
pub struct ResolvedTenant {
    pub connection: TenantConnection,
    pub entities: Arc<EntitySet>,
}

impl ResolvedTenant {
    pub fn locator(&self) -> &str {
        self.connection.locator()
    }
}

/// Locator → live tenant store. Injected into the tenant context extractor and onboarding.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// Create the isolated store for a freshly registered tenant.
    async fn provision(&self, locator: &str) -> Result<(), DatabaseError>;

    async fn resolve(&self, locator: &str) -> Result<ResolvedTenant, DatabaseError>;
}

/// Process-wide owner of the connection cache and the bound entity sets.
pub struct TenantStores {
    connections: ConnectionCache,
    models: ModelFactory,
}

impl TenantStores {
    pub fn new(driver: Arc<dyn StoreDriver>, connect_timeout: std::time::Duration) -> Self {
        Self {
            connections: ConnectionCache::new(driver, connect_timeout),
            models: ModelFactory::new(),
        }
    }

    pub fn connections(&self) -> &ConnectionCache {
        &self.connections
    }

    pub async fn close_all(&self) {
        self.connections.close_all().await;
        self.models.clear().await;
    }
}

#[async_trait]
impl TenantResolver for TenantStores {
    async fn provision(&self, locator: &str) -> Result<(), DatabaseError> {
        self.connections.driver().provision(locator).await?;
        info!("Provisioned tenant store: {}", locator);
        Ok(())
    }

    async fn resolve(&self, locator: &str) -> Result<ResolvedTenant, DatabaseError> {
        let connection = self.connections.get_connection(locator).await?;
        let entities = self.models.get_entity_set(&connection).await?;
        Ok(ResolvedTenant {
            connection,
            entities,
        })
    }
}
