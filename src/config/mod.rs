use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::registry::RegistrySettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StoreBackend,
    /// Base server URL; the path is replaced with the registry or tenant database name.
    pub url: Option<String>,
    pub registry_database: String,
    pub max_connections: u32,
    /// Seconds allowed for establishing a tenant connection.
    pub connection_timeout: u64,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub join_code_length: usize,
    pub join_code_max_attempts: u32,
    pub search_limit: i64,
}

impl RegistryConfig {
    pub fn settings(&self) -> RegistrySettings {
        RegistrySettings {
            join_code_length: self.join_code_length,
            join_code_max_attempts: self.join_code_max_attempts,
            search_limit: self.search_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub bcrypt_cost: u32,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Preset for `APP_ENV`, then individual overrides, all read through `var`
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let environment = match var("APP_ENV").as_deref() {
            Some("production") | Some("prod") => Environment::Production,
            Some("staging") | Some("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(var)
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        // Database overrides
        if let Some(v) = var("STORE_BACKEND") {
            match v.trim().to_ascii_lowercase().as_str() {
                "memory" => self.database.backend = StoreBackend::Memory,
                "postgres" | "postgresql" => self.database.backend = StoreBackend::Postgres,
                _ => {}
            }
        }
        if let Some(v) = var("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(v);
        }
        if let Some(v) = var("REGISTRY_DATABASE").filter(|v| !v.is_empty()) {
            self.database.registry_database = v;
        }
        if let Some(v) = var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Some(v) = var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout =
                v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Registry overrides
        if let Some(v) = var("REGISTRY_JOIN_CODE_LENGTH") {
            self.registry.join_code_length = v.parse().unwrap_or(self.registry.join_code_length);
        }
        if let Some(v) = var("REGISTRY_JOIN_CODE_MAX_ATTEMPTS") {
            self.registry.join_code_max_attempts =
                v.parse().unwrap_or(self.registry.join_code_max_attempts);
        }
        if let Some(v) = var("REGISTRY_SEARCH_LIMIT") {
            self.registry.search_limit = v.parse().unwrap_or(self.registry.search_limit);
        }

        // API overrides; tests and deployments pick the port
        if let Some(port) = var("CLINIC_API_PORT")
            .or_else(|| var("PORT"))
            .and_then(|s| s.parse().ok())
        {
            self.api.port = port;
        }

        // Security overrides
        if let Some(v) = var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Some(v) = var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Some(v) = var("SECURITY_BCRYPT_COST") {
            self.security.bcrypt_cost = v.parse().unwrap_or(self.security.bcrypt_cost);
        }
        if let Some(v) = var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Some(v) = var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                backend: StoreBackend::Postgres,
                url: None,
                registry_database: "clinic_registry".to_string(),
                max_connections: 10,
                connection_timeout: 30,
            },
            registry: RegistryConfig::default(),
            api: ApiConfig { port: 3000 },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24 * 7, // 1 week
                bcrypt_cost: 10,
                enable_cors: true,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ],
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                backend: StoreBackend::Postgres,
                url: None,
                registry_database: "clinic_registry".to_string(),
                max_connections: 20,
                connection_timeout: 10,
            },
            registry: RegistryConfig::default(),
            api: ApiConfig { port: 3000 },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                bcrypt_cost: 12,
                enable_cors: true,
                cors_origins: vec!["https://staging.example.com".to_string()],
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                backend: StoreBackend::Postgres,
                url: None,
                registry_database: "clinic_registry".to_string(),
                max_connections: 50,
                connection_timeout: 5,
            },
            registry: RegistryConfig::default(),
            api: ApiConfig { port: 3000 },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                bcrypt_cost: 12,
                enable_cors: true,
                cors_origins: vec!["https://app.example.com".to_string()],
            },
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let settings = RegistrySettings::default();
        Self {
            join_code_length: settings.join_code_length,
            join_code_max_attempts: settings.join_code_max_attempts,
            search_limit: settings.search_limit,
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
