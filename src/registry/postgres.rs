use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use super::{RegistryError, RegistryStore, SuperAdminRecord, TenantRecord};
use crate::database::postgres::PgDriver;

const UNIQUE_VIOLATION: &str = "23505";

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenants (
        id UUID PRIMARY KEY,
        display_name TEXT NOT NULL,
        slug TEXT NOT NULL CONSTRAINT tenants_slug_key UNIQUE,
        store_locator TEXT NOT NULL CONSTRAINT tenants_store_locator_key UNIQUE,
        owner_email TEXT NOT NULL CONSTRAINT tenants_owner_email_key UNIQUE,
        join_code TEXT NOT NULL CONSTRAINT tenants_join_code_key UNIQUE,
        is_active BOOLEAN NOT NULL DEFAULT true,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS tenants_active_created_idx ON tenants (is_active, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS super_admins (
        email TEXT PRIMARY KEY,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

const TENANT_COLUMNS: &str = "id, display_name, slug, store_locator, owner_email, join_code, \
                              is_active, created_at, updated_at";

/// Registry tables in the fixed registry database.
pub struct PgRegistryStore {
    pool: PgPool,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the registry database, creating it on first use
    pub async fn connect(driver: &PgDriver, database: &str) -> Result<Self, RegistryError> {
        driver.create_database_if_missing(database).await?;
        let pool = driver
            .pool_options()
            .connect(&driver.connection_string(database))
            .await?;
        info!("Connected to registry database: {}", database);
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_insert_error(error: sqlx::Error, tenant: &TenantRecord) -> RegistryError {
    if let sqlx::Error::Database(db) = &error {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return match db.constraint() {
                Some("tenants_slug_key") => RegistryError::SlugTaken(tenant.slug.clone()),
                Some("tenants_owner_email_key") => {
                    RegistryError::EmailTaken(tenant.owner_email.clone())
                }
                Some("tenants_join_code_key") => RegistryError::JoinCodeTaken,
                _ => RegistryError::LocatorTaken(tenant.store_locator.clone()),
            };
        }
    }
    RegistryError::Store(error)
}

/// Escape LIKE wildcards so the query matches literally
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn migrate(&self) -> Result<(), RegistryError> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Registry schema is up to date");
        Ok(())
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_tenant(&self, tenant: &TenantRecord) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, display_name, slug, store_locator, owner_email, join_code,
                                 is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.display_name)
        .bind(&tenant.slug)
        .bind(&tenant.store_locator)
        .bind(&tenant.owner_email)
        .bind(&tenant.join_code)
        .bind(tenant.is_active)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, tenant))?;
        Ok(())
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, RegistryError> {
        let exists = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tenants WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, RegistryError> {
        let exists =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tenants WHERE owner_email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn join_code_exists(&self, code: &str) -> Result<bool, RegistryError> {
        let exists =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tenants WHERE join_code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<TenantRecord>, RegistryError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE slug = $1");
        let tenant = sqlx::query_as::<_, TenantRecord>(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn find_by_join_code(&self, code: &str) -> Result<Option<TenantRecord>, RegistryError> {
        let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE join_code = $1");
        let tenant = sqlx::query_as::<_, TenantRecord>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn list_active(&self) -> Result<Vec<TenantRecord>, RegistryError> {
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE is_active ORDER BY created_at"
        );
        let tenants = sqlx::query_as::<_, TenantRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(tenants)
    }

    async fn search_active(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<TenantRecord>, RegistryError> {
        let sql = format!(
            "SELECT {TENANT_COLUMNS} FROM tenants \
             WHERE is_active AND display_name ILIKE $1 \
             ORDER BY display_name LIMIT $2"
        );
        let tenants = sqlx::query_as::<_, TenantRecord>(&sql)
            .bind(like_pattern(query))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(tenants)
    }

    async fn set_active(&self, slug: &str, active: bool) -> Result<bool, RegistryError> {
        let result =
            sqlx::query("UPDATE tenants SET is_active = $2, updated_at = now() WHERE slug = $1")
                .bind(slug)
                .bind(active)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_super_admin(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, RegistryError> {
        let result = sqlx::query(
            "INSERT INTO super_admins (email, password_hash) VALUES ($1, $2) \
             ON CONFLICT (email) DO NOTHING",
        )
        .bind(email)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_super_admin(
        &self,
        email: &str,
    ) -> Result<Option<SuperAdminRecord>, RegistryError> {
        let admin = sqlx::query_as::<_, SuperAdminRecord>(
            "SELECT email, password_hash, created_at FROM super_admins WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(admin)
    }
}
