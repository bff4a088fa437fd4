use serde::Serialize;

use crate::auth::Role;
use crate::database::driver::Document;
use crate::database::models::redact_user;
use crate::middleware::{ApiResponse, ApiResult, CallerIdentity, TenantContext};

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub role: Role,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Document>,
    pub store_locator: Option<String>,
}

/// GET /api/auth/whoami - Caller identity as resolved from the token
///
/// Tenant users get their stored `User` record (secrets removed). Super-admins
/// get no record and a locator only when their token was scoped to a clinic.
pub async fn whoami(ctx: TenantContext) -> ApiResult<WhoAmI> {
    let user = match &ctx.caller {
        CallerIdentity::TenantUser(user) => Some(redact_user(user.record.clone())),
        CallerIdentity::SuperAdmin { .. } => None,
    };

    Ok(ApiResponse::success(WhoAmI {
        role: ctx.caller.role(),
        email: ctx.caller.email().to_string(),
        user,
        store_locator: ctx.store_locator().map(str::to_string),
    }))
}
