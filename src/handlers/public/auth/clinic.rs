// handlers/public/auth/clinic.rs - Clinic signup and member join
use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::onboarding::{AuthSession, CreateClinicRequest, JoinClinicRequest};

/// POST /auth/clinics - Register a clinic and its first administrator
///
/// Expected Input:
/// ```json
/// {
///   "clinic_name": "Sunrise Clinic",
///   "admin_name": "Ada Park",
///   "email": "admin@sunrise.com",
///   "password": "at least 8 chars"
/// }
/// ```
///
/// Responds 201 with `{ token, user, clinic: { id, name, slug, join_code } }`.
/// The token is already scoped to the new clinic's store.
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateClinicRequest>, JsonRejection>,
) -> ApiResult<AuthSession> {
    let Json(request) = payload?;
    let session = state.onboarding.create_clinic(request).await?;
    Ok(ApiResponse::created(session))
}

/// POST /auth/join - Join an existing clinic with its join code
///
/// Expected Input:
/// ```json
/// {
///   "join_code": "AB3K9Z",
///   "name": "Dr. Lee",
///   "email": "lee@sunrise.com",
///   "password": "at least 8 chars",
///   "role": "doctor"
/// }
/// ```
pub async fn join(
    State(state): State<AppState>,
    payload: Result<Json<JoinClinicRequest>, JsonRejection>,
) -> ApiResult<AuthSession> {
    let Json(request) = payload?;
    let session = state.onboarding.join_clinic(request).await?;
    Ok(ApiResponse::created(session))
}
