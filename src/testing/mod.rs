use std::sync::Arc;

use axum::Router;

use crate::app::{self, AppState};
use crate::auth::JwtCredentials;
use crate::config::AppConfig;
use crate::database::memory::MemoryDriver;
use crate::database::stores::TenantStores;
use crate::registry::{MemoryRegistryStore, TenantRegistry};
use crate::services::notification::LogNotifier;
use crate::services::onboarding::{AuthSession, CreateClinicRequest, OnboardingService};

/// Fully wired in-memory application for unit tests
pub struct TestContext {
    pub config: AppConfig,
    pub registry: TenantRegistry,
    pub stores: Arc<TenantStores>,
    pub credentials: Arc<JwtCredentials>,
    pub onboarding: Arc<OnboardingService>,
    pub state: AppState,
}

impl TestContext {
    pub fn new() -> Self {
        let config = AppConfig::from_lookup(|key| {
            match key {
                "STORE_BACKEND" => Some("memory"),
                "JWT_SECRET" => Some("test-secret"),
                "SECURITY_BCRYPT_COST" => Some("4"),
                "DATABASE_CONNECTION_TIMEOUT" => Some("5"),
                _ => None,
            }
            .map(str::to_string)
        });

        let credentials = Arc::new(
            app::credentials(&config.security).expect("test credentials are configured"),
        );
        let registry = TenantRegistry::new(
            Arc::new(MemoryRegistryStore::new()),
            config.registry.settings(),
        );
        let stores = Arc::new(TenantStores::new(
            Arc::new(MemoryDriver::new()),
            config.database.connect_timeout(),
        ));
        let state = AppState::new(
            registry.clone(),
            stores.clone(),
            credentials.clone(),
            Arc::new(LogNotifier),
        );

        Self {
            config,
            registry,
            stores,
            credentials,
            onboarding: state.onboarding.clone(),
            state,
        }
    }

    pub fn router(&self) -> Router {
        app::router(self.state.clone(), &self.config.security)
    }

    /// Sign up `name` with an admin at `email` (password "password123").
    pub async fn onboard_clinic(&self, name: &str, email: &str) -> AuthSession {
        self.onboarding
            .create_clinic(CreateClinicRequest {
                clinic_name: name.to_string(),
                admin_name: "Test Admin".to_string(),
                email: email.to_string(),
                password: "password123".to_string(),
            })
            .await
            .expect("clinic onboarding succeeds")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
