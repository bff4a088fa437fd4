//! Postgres store engine: one database per tenant, one JSONB document table per entity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;
use tracing::info;
use uuid::Uuid;

use crate::database::driver::{
    strip_system_fields, with_system_fields, Document, EntityAccessor, ReadyState, StoreDriver,
    StoreHandle,
};
use crate::database::manager::{is_valid_locator, DatabaseError};
use crate::database::models::EntitySchema;

const UNIQUE_VIOLATION: &str = "23505";
const DUPLICATE_DATABASE: &str = "42P04";
const ADMIN_DATABASE: &str = "postgres";

pub struct PgDriver {
    base_url: url::Url,
    max_connections: u32,
    acquire_timeout: Duration,
    admin: OnceCell<PgPool>,
}

impl PgDriver {
    pub fn new(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let base_url = url::Url::parse(database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        Ok(Self {
            base_url,
            max_connections,
            acquire_timeout,
            admin: OnceCell::new(),
        })
    }

    /// Build connection string by swapping the database name in the base URL path
    pub fn connection_string(&self, database_name: &str) -> String {
        let mut url = self.base_url.clone();
        url.set_path(&format!("/{}", database_name));
        url.into()
    }

    /// Pool options shared by tenant, registry and admin connections
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
    }

    /// Create `name` through the admin connection unless it already exists
    pub async fn create_database_if_missing(&self, name: &str) -> Result<(), DatabaseError> {
        let admin = self.admin_pool().await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(name)
                .fetch_one(admin)
                .await?;
        if exists {
            return Ok(());
        }

        let statement = format!("CREATE DATABASE {}", quote_identifier(name));
        match sqlx::query(&statement).execute(admin).await {
            Ok(_) => {
                info!("Created database: {}", name);
                Ok(())
            }
            // Lost a race with a concurrent provision of the same store
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn admin_pool(&self) -> Result<&PgPool, DatabaseError> {
        self.admin
            .get_or_try_init(|| async {
                let pool = self
                    .pool_options()
                    .max_connections(1)
                    .connect(&self.connection_string(ADMIN_DATABASE))
                    .await?;
                Ok::<_, DatabaseError>(pool)
            })
            .await
    }
}

/// Quote SQL identifier to prevent injection
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[async_trait]
impl StoreDriver for PgDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn address_for(&self, locator: &str) -> Result<String, DatabaseError> {
        if !is_valid_locator(locator) {
            return Err(DatabaseError::InvalidLocator(locator.to_string()));
        }
        Ok(self.connection_string(locator))
    }

    async fn open(&self, address: &str) -> Result<Arc<dyn StoreHandle>, DatabaseError> {
        let pool = self.pool_options().connect(address).await?;
        Ok(Arc::new(PgHandle { pool }))
    }

    async fn provision(&self, locator: &str) -> Result<(), DatabaseError> {
        if !is_valid_locator(locator) {
            return Err(DatabaseError::InvalidLocator(locator.to_string()));
        }
        self.create_database_if_missing(locator).await
    }
}

pub struct PgHandle {
    pool: PgPool,
}

#[async_trait]
impl StoreHandle for PgHandle {
    fn ready_state(&self) -> ReadyState {
        if self.pool.is_closed() {
            ReadyState::Closed
        } else {
            ReadyState::Ready
        }
    }

    async fn bind(
        &self,
        schema: &'static EntitySchema,
    ) -> Result<Arc<dyn EntityAccessor>, DatabaseError> {
        let table = quote_identifier(schema.collection);
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                data JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        )];
        for field in schema.unique {
            statements.push(unique_index_ddl(schema, field));
        }

        for statement in statements {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::SchemaBinding {
                    entity: schema.name,
                    message: e.to_string(),
                })?;
        }

        Ok(Arc::new(PgEntityAccessor {
            schema,
            table,
            pool: self.pool.clone(),
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn unique_index_name(schema: &EntitySchema, field: &str) -> String {
    format!("{}_{}_key", schema.collection, field)
}

/// Same normalization as `unique_key`: trimmed and lowercased.
fn unique_index_ddl(schema: &EntitySchema, field: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (lower(btrim(data->>'{}')))",
        quote_identifier(&unique_index_name(schema, field)),
        quote_identifier(schema.collection),
        field
    )
}

struct PgEntityAccessor {
    schema: &'static EntitySchema,
    table: String,
    pool: PgPool,
}

const COLUMNS: &str = "id, data, created_at, updated_at";

impl PgEntityAccessor {
    fn row_to_document(row: &PgRow) -> Result<Document, DatabaseError> {
        let id: Uuid = row.try_get("id")?;
        let data: Value = row.try_get("data")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

        let data = match data {
            Value::Object(map) => map,
            _ => Document::new(),
        };
        Ok(with_system_fields(data, id, created_at, updated_at))
    }

    /// Unique index violations become typed duplicates; everything else passes through
    fn map_write_error(&self, error: sqlx::Error) -> DatabaseError {
        if let sqlx::Error::Database(db) = &error {
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
                let field = self
                    .schema
                    .unique
                    .iter()
                    .find(|f| db.constraint() == Some(unique_index_name(self.schema, f).as_str()))
                    .map_or("id", |f| *f);
                return DatabaseError::Duplicate {
                    entity: self.schema.name,
                    field: field.to_string(),
                };
            }
        }
        error.into()
    }

    /// WHERE clause for an equality filter. `id` is a column; everything else lives in `data`.
    fn where_clause(filter: &Document) -> (String, Document, Option<Uuid>, bool) {
        let mut data_filter = filter.clone();
        let id = data_filter.remove("id");
        match id {
            None => ("WHERE data @> $1".to_string(), data_filter, None, true),
            Some(value) => match value.as_str().and_then(|s| Uuid::parse_str(s).ok()) {
                Some(id) => ("WHERE data @> $1 AND id = $2".to_string(), data_filter, Some(id), true),
                // An id that is not a UUID matches nothing
                None => ("WHERE false".to_string(), data_filter, None, false),
            },
        }
    }
}

#[async_trait]
impl EntityAccessor for PgEntityAccessor {
    fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    async fn insert(&self, doc: Document) -> Result<Document, DatabaseError> {
        let data = strip_system_fields(doc);
        if let Some(field) = self.schema.missing_required(&data) {
            return Err(DatabaseError::Validation {
                entity: self.schema.name,
                message: format!("missing required field '{field}'"),
            });
        }

        let sql = format!(
            "INSERT INTO {} (id, data) VALUES ($1, $2) RETURNING {COLUMNS}",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(Json(Value::Object(data)))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_write_error(e))?;
        Self::row_to_document(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, DatabaseError> {
        let sql = format!("SELECT {COLUMNS} FROM {} WHERE id = $1", self.table);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn find(
        &self,
        filter: &Document,
        limit: Option<i64>,
    ) -> Result<Vec<Document>, DatabaseError> {
        let (clause, data_filter, id, binds_data) = Self::where_clause(filter);
        let mut sql = format!("SELECT {COLUMNS} FROM {} {clause} ORDER BY created_at", self.table);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let mut query = sqlx::query(&sql);
        if binds_data {
            query = query.bind(Json(Value::Object(data_filter)));
        }
        if let Some(id) = id {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_document).collect()
    }

    async fn update(&self, id: Uuid, patch: Document) -> Result<Option<Document>, DatabaseError> {
        let patch = strip_system_fields(patch);
        let sql = format!(
            "UPDATE {} SET data = data || $2, updated_at = now() WHERE id = $1 RETURNING {COLUMNS}",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Json(Value::Object(patch)))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_write_error(e))?;
        row.as_ref().map(Self::row_to_document).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, filter: &Document) -> Result<i64, DatabaseError> {
        let (clause, data_filter, id, binds_data) = Self::where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM {} {clause}", self.table);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if binds_data {
            query = query.bind(Json(Value::Object(data_filter)));
        }
        if let Some(id) = id {
            query = query.bind(id);
        }
        Ok(query.fetch_one(&self.pool).await?)
    }
}
