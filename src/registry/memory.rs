use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{RegistryError, RegistryStore, SuperAdminRecord, TenantRecord};

/// Registry kept in process memory, used by the memory backend and tests.
#[derive(Default)]
pub struct MemoryRegistryStore {
    tenants: RwLock<Vec<TenantRecord>>,
    super_admins: RwLock<HashMap<String, SuperAdminRecord>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn migrate(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn insert_tenant(&self, tenant: &TenantRecord) -> Result<(), RegistryError> {
        let mut tenants = self.tenants.write().await;
        for existing in tenants.iter() {
            if existing.slug == tenant.slug {
                return Err(RegistryError::SlugTaken(tenant.slug.clone()));
            }
            if existing.owner_email == tenant.owner_email {
                return Err(RegistryError::EmailTaken(tenant.owner_email.clone()));
            }
            if existing.store_locator == tenant.store_locator {
                return Err(RegistryError::LocatorTaken(tenant.store_locator.clone()));
            }
            if existing.join_code == tenant.join_code {
                return Err(RegistryError::JoinCodeTaken);
            }
        }
        tenants.push(tenant.clone());
        Ok(())
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, RegistryError> {
        Ok(self.tenants.read().await.iter().any(|t| t.slug == slug))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, RegistryError> {
        Ok(self.tenants.read().await.iter().any(|t| t.owner_email == email))
    }

    async fn join_code_exists(&self, code: &str) -> Result<bool, RegistryError> {
        Ok(self.tenants.read().await.iter().any(|t| t.join_code == code))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, RegistryError> {
        Ok(self.tenants.read().await.iter().find(|t| t.slug == slug).cloned())
    }

    async fn find_by_join_code(&self, code: &str) -> Result<Option<TenantRecord>, RegistryError> {
        Ok(self
            .tenants
            .read()
            .await
            .iter()
            .find(|t| t.join_code == code)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        Ok(self
            .tenants
            .read()
            .await
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect())
    }

    async fn search_active(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<TenantRecord>, RegistryError> {
        let needle = query.to_lowercase();
        let mut found: Vec<TenantRecord> = self
            .tenants
            .read()
            .await
            .iter()
            .filter(|t| t.is_active && t.display_name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn set_active(&self, slug: &str, active: bool) -> Result<bool, RegistryError> {
        let mut tenants = self.tenants.write().await;
        match tenants.iter_mut().find(|t| t.slug == slug) {
            Some(tenant) => {
                tenant.is_active = active;
                tenant.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_super_admin(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RegistryError> {
        let mut admins = self.super_admins.write().await;
        if admins.contains_key(email) {
            return Ok(false);
        }
        admins.insert(
            email.to_string(),
            SuperAdminRecord {
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn find_super_admin(
        &self,
        email: &str,
    ) -> Result<Option<SuperAdminRecord>, RegistryError> {
        Ok(self.super_admins.read().await.get(email).cloned())
    }
}
