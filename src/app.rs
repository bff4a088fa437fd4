//! Application wiring: shared state built from configuration, and the router.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{CredentialService, JwtCredentials};
use crate::config::{AppConfig, SecurityConfig, StoreBackend};
use crate::database::driver::StoreDriver;
use crate::database::memory::MemoryDriver;
use crate::database::postgres::PgDriver;
use crate::database::stores::{TenantResolver, TenantStores};
use crate::handlers;
use crate::registry::{MemoryRegistryStore, PgRegistryStore, RegistryStore, TenantRegistry};
use crate::services::notification::{LogNotifier, Notifier};
use crate::services::onboarding::OnboardingService;

/// Everything a handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: TenantRegistry,
    pub stores: Arc<dyn TenantResolver>,
    pub credentials: Arc<dyn CredentialService>,
    pub onboarding: Arc<OnboardingService>,
}

impl AppState {
    pub fn new(
        registry: TenantRegistry,
        stores: Arc<dyn TenantResolver>,
        credentials: Arc<dyn CredentialService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let onboarding = Arc::new(OnboardingService::new(
            registry.clone(),
            stores.clone(),
            credentials.clone(),
            notifier,
        ));
        Self {
            registry,
            stores,
            credentials,
            onboarding,
        }
    }
}

/// Built services plus the concrete tenant store owner, kept for shutdown.
pub struct Services {
    pub state: AppState,
    pub stores: Arc<TenantStores>,
}

/// Open the registry for the configured backend and run its migrations
pub async fn connect_registry(config: &AppConfig) -> anyhow::Result<Arc<dyn RegistryStore>> {
    let store: Arc<dyn RegistryStore> = match config.database.backend {
        StoreBackend::Memory => Arc::new(MemoryRegistryStore::new()),
        StoreBackend::Postgres => {
            let driver = pg_driver(config)?;
            Arc::new(
                PgRegistryStore::connect(&driver, &config.database.registry_database)
                    .await
                    .context("failed to connect to registry database")?,
            )
        }
    };
    store.migrate().await.context("registry migration failed")?;
    Ok(store)
}

fn pg_driver(config: &AppConfig) -> anyhow::Result<PgDriver> {
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL must be set for the postgres backend")?;
    Ok(PgDriver::new(
        url,
        config.database.max_connections,
        config.database.connect_timeout(),
    )?)
}

pub fn credentials(security: &SecurityConfig) -> anyhow::Result<JwtCredentials> {
    JwtCredentials::new(
        &security.jwt_secret,
        security.jwt_expiry_hours as i64,
        security.bcrypt_cost,
    )
    .context("JWT_SECRET must be set")
}

pub async fn build(config: &AppConfig) -> anyhow::Result<Services> {
    let credentials: Arc<dyn CredentialService> = Arc::new(credentials(&config.security)?);

    let driver: Arc<dyn StoreDriver> = match config.database.backend {
        StoreBackend::Memory => Arc::new(MemoryDriver::new()),
        StoreBackend::Postgres => Arc::new(pg_driver(config)?),
    };
    info!("Using {} tenant store backend", driver.name());

    let registry = TenantRegistry::new(connect_registry(config).await?, config.registry.settings());
    let stores = Arc::new(TenantStores::new(driver, config.database.connect_timeout()));
    let state = AppState::new(registry, stores.clone(), credentials, Arc::new(LogNotifier));

    Ok(Services { state, stores })
}

pub fn router(state: AppState, security: &SecurityConfig) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .merge(public_routes())
        .merge(protected_routes())
        .layer(cors_layer(security))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn public_routes() -> Router<AppState> {
    use axum::routing::post;
    use handlers::public::{auth, clinics};

    Router::new()
        .route("/auth/clinics", post(auth::clinic_create))
        .route("/auth/join", post(auth::clinic_join))
        .route("/auth/login", post(auth::login))
        .route("/auth/super-admin/login", post(auth::super_admin_login))
        .route("/clinics/search", get(clinics::search))
        .route("/clinics/join/:code", get(clinics::preview))
}

fn protected_routes() -> Router<AppState> {
    use handlers::protected::{auth, entities};

    Router::new()
        .route("/api/auth/whoami", get(auth::whoami))
        .route(
            "/api/entities/:entity",
            get(entities::collection_get).post(entities::collection_post),
        )
        .route(
            "/api/entities/:entity/:id",
            get(entities::record_get)
                .patch(entities::record_patch)
                .delete(entities::record_delete),
        )
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    if !security.enable_cors {
        return CorsLayer::new();
    }
    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any)
}
