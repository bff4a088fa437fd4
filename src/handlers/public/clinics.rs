// handlers/public/clinics.rs - Clinic discovery
use axum::extract::{Path, Query, State};
use serde::Deserialize;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::registry::ClinicListing;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /clinics/search?q= - Active clinics whose name contains `q`
pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<ClinicListing>> {
    let tenants = state.registry.search_by_name(&query.q).await?;
    Ok(ApiResponse::success(
        tenants.iter().map(ClinicListing::from).collect(),
    ))
}

/// GET /clinics/join/:code - Which clinic a join code belongs to
pub async fn preview(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<ClinicListing> {
    let tenant = state.registry.find_by_join_code(&code).await?;
    Ok(ApiResponse::success(ClinicListing::from(&tenant)))
}
