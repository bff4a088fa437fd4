// handlers/mod.rs - Two-tier handler layout
//
// Public (no auth) -> Protected (bearer token resolved to a tenant store)
pub mod protected; // /api/*: TenantContext extractor required
pub mod public; // /auth/*, /clinics/*: anonymous

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET / - service description
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Clinic API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Multi-tenant clinic backend with one isolated store per clinic",
            "endpoints": {
                "public_auth": "/auth/clinics, /auth/join, /auth/login, /auth/super-admin/login (public - token acquisition)",
                "clinics": "/clinics/search?q=, /clinics/join/:code (public - discovery)",
                "auth": "/api/auth/whoami (protected)",
                "entities": "/api/entities/:entity[/:id] (protected)",
            }
        }
    }))
}

/// GET /health - registry reachability
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.registry.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "registry": "ok"
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "registry unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "registry_error": e.to_string()
                }
            })),
        ),
    }
}
