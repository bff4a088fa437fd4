// handlers/public/auth/session.rs - Credential login
use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::onboarding::{AuthSession, LoginRequest};

/// POST /auth/login - Authenticate a clinic member
///
/// `join_code` is optional. Without it every active clinic is searched for
/// the email and the first matching password wins.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<AuthSession> {
    let Json(request) = payload?;
    Ok(ApiResponse::success(state.onboarding.login(request).await?))
}

/// POST /auth/super-admin/login - Authenticate a platform operator
pub async fn super_admin_login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<AuthSession> {
    let Json(request) = payload?;
    Ok(ApiResponse::success(
        state.onboarding.super_admin_login(request).await?,
    ))
}
