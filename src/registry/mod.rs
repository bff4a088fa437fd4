//! The tenant registry: one record per clinic in a single fixed store.

pub mod memory;
pub mod naming;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
pub use crate::database::models::{ClinicListing, SuperAdminRecord, TenantRecord, TenantSummary};

pub use memory::MemoryRegistryStore;
pub use postgres::PgRegistryStore;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid clinic name: {0}")]
    InvalidName(String),

    #[error("A clinic with this name already exists")]
    SlugTaken(String),

    #[error("A clinic is already registered to {0}")]
    EmailTaken(String),

    #[error("Store locator collision: {0}")]
    LocatorTaken(String),

    #[error("Join code already in use")]
    JoinCodeTaken,

    #[error("Could not allocate a unique join code after {0} attempts")]
    JoinCodeExhausted(u32),

    #[error("Invalid clinic code")]
    NotFound(String),

    #[error("Registry store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl RegistryError {
    /// Uniqueness failures surfaced to callers as a rejected request.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RegistryError::SlugTaken(_)
                | RegistryError::EmailTaken(_)
                | RegistryError::LocatorTaken(_)
                | RegistryError::JoinCodeTaken
                | RegistryError::JoinCodeExhausted(_)
        )
    }
}

/// Raw registry persistence. Uniqueness of slug, locator, owner email and
/// join code is enforced atomically by `insert_tenant`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Create registry tables if they do not exist.
    async fn migrate(&self) -> Result<(), RegistryError>;

    async fn ping(&self) -> Result<(), RegistryError>;

    async fn insert_tenant(&self, tenant: &TenantRecord) -> Result<(), RegistryError>;

    async fn slug_exists(&self, slug: &str) -> Result<bool, RegistryError>;

    async fn email_exists(&self, email: &str) -> Result<bool, RegistryError>;

    async fn join_code_exists(&self, code: &str) -> Result<bool, RegistryError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, RegistryError>;

    /// Exact match against the stored (uppercase) code, active or not.
    async fn find_by_join_code(&self, code: &str) -> Result<Option<TenantRecord>, RegistryError>;

    /// Active tenants, oldest first.
    async fn list_active(&self) -> Result<Vec<TenantRecord>, RegistryError>;

    /// Active tenants whose display name contains `query`, case-insensitively.
    async fn search_active(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<TenantRecord>, RegistryError>;

    /// Returns false when no tenant has `slug`.
    async fn set_active(&self, slug: &str, active: bool) -> Result<bool, RegistryError>;

    /// Returns false (and changes nothing) if the email already has a record.
    async fn insert_super_admin(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RegistryError>;

    async fn find_super_admin(&self, email: &str)
        -> Result<Option<SuperAdminRecord>, RegistryError>;
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub join_code_length: usize,
    pub join_code_max_attempts: u32,
    pub search_limit: i64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            join_code_length: 6,
            join_code_max_attempts: 1000,
            search_limit: 20,
        }
    }
}

/// Tenant creation and lookup policy over a [`RegistryStore`].
#[derive(Clone)]
pub struct TenantRegistry {
    store: Arc<dyn RegistryStore>,
    settings: RegistrySettings,
}

impl TenantRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, settings: RegistrySettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<dyn RegistryStore> {
        &self.store
    }

    /// Register a new clinic. The returned record already holds a unique
    /// slug, store locator and join code.
    pub async fn create_tenant(
        &self,
        display_name: &str,
        owner_email: &str,
    ) -> Result<TenantRecord, RegistryError> {
        let display_name = display_name.trim();
        validate_display_name(display_name)?;

        let slug = naming::slugify(display_name);
        if slug.is_empty() {
            return Err(RegistryError::InvalidName(
                "Clinic name must contain letters or numbers".to_string(),
            ));
        }
        let owner_email = naming::normalize_email(owner_email);

        if self.store.slug_exists(&slug).await? {
            return Err(RegistryError::SlugTaken(slug));
        }
        if self.store.email_exists(&owner_email).await? {
            return Err(RegistryError::EmailTaken(owner_email));
        }

        for attempt in 1..=self.settings.join_code_max_attempts {
            let join_code = naming::generate_join_code(self.settings.join_code_length);
            if self.store.join_code_exists(&join_code).await? {
                debug!("Join code draw {} collided", attempt);
                continue;
            }

            let now = Utc::now();
            let tenant = TenantRecord {
                id: Uuid::new_v4(),
                display_name: display_name.to_string(),
                slug: slug.clone(),
                store_locator: naming::store_locator(&slug, now),
                owner_email: owner_email.clone(),
                join_code,
                is_active: true,
                created_at: now,
                updated_at: now,
            };

            match self.store.insert_tenant(&tenant).await {
                Ok(()) => {
                    info!(
                        "Registered tenant {} ({}) with store {}",
                        tenant.slug, tenant.id, tenant.store_locator
                    );
                    return Ok(tenant);
                }
                // Another signup claimed the code between the check and the insert
                Err(RegistryError::JoinCodeTaken) => continue,
                Err(e) => return Err(e),
            }
        }

        warn!("Join code space exhausted for tenant {}", slug);
        Err(RegistryError::JoinCodeExhausted(
            self.settings.join_code_max_attempts,
        ))
    }

    /// Active tenant holding `code`, ignoring case and surrounding whitespace.
    pub async fn find_by_join_code(&self, code: &str) -> Result<TenantRecord, RegistryError> {
        let code = naming::normalize_join_code(code);
        self.store
            .find_by_join_code(&code)
            .await?
            .filter(|tenant| tenant.is_active)
            .ok_or(RegistryError::NotFound(code))
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<TenantRecord, RegistryError> {
        self.store
            .find_by_slug(slug)
            .await?
            .ok_or_else(|| RegistryError::NotFound(slug.to_string()))
    }

    /// Full scan of active tenants. Only login without a clinic code should need this.
    pub async fn list_active(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        self.store.list_active().await
    }

    /// Clinic discovery by display name substring, bounded by the configured limit.
    pub async fn search_by_name(&self, query: &str) -> Result<Vec<TenantRecord>, RegistryError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        self.store
            .search_active(query, self.settings.search_limit)
            .await
    }

    /// Soft-disable: the record stays, but the tenant drops out of joins, scans and search.
    pub async fn deactivate(&self, slug: &str) -> Result<(), RegistryError> {
        if self.store.set_active(slug, false).await? {
            info!("Deactivated tenant {}", slug);
            Ok(())
        } else {
            Err(RegistryError::NotFound(slug.to_string()))
        }
    }

    /// Idempotent; returns whether a new record was written.
    pub async fn provision_super_admin(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RegistryError> {
        let email = naming::normalize_email(email);
        self.store.insert_super_admin(&email, password_hash).await
    }

    pub async fn find_super_admin(
        &self,
        email: &str,
    ) -> Result<Option<SuperAdminRecord>, RegistryError> {
        self.store
            .find_super_admin(&naming::normalize_email(email))
            .await
    }
}

fn validate_display_name(name: &str) -> Result<(), RegistryError> {
    let length = name.chars().count();
    if length < 2 {
        return Err(RegistryError::InvalidName(
            "Clinic name must be at least 2 characters".to_string(),
        ));
    }
    if length > 100 {
        return Err(RegistryError::InvalidName(
            "Clinic name must be at most 100 characters".to_string(),
        ));
    }
    Ok(())
}
