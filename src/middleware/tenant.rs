//! Per-request tenant resolution.
//!
//! [`TenantContext`] is an axum extractor: any handler that takes it runs only
//! after the caller's token has been verified and the tenant store named in
//! the token is connected and bound. Nothing is attached on failure.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::{AuthError, CredentialService, Role};
use crate::database::driver::Document;
use crate::database::factory::EntitySet;
use crate::database::manager::DatabaseError;
use crate::database::stores::{ResolvedTenant, TenantResolver};
use crate::error::ApiError;
use crate::middleware::auth::extract_bearer_token;

#[derive(Debug, Error)]
pub enum TenantContextError {
    #[error("{0}")]
    MissingToken(&'static str),

    #[error(transparent)]
    InvalidToken(#[from] AuthError),

    #[error("Token missing tenant, must re-authenticate")]
    MissingTenant,

    #[error("Token subject is not a user id")]
    InvalidSubject,

    #[error("User not found")]
    UserNotFound,

    #[error("Tenant store unavailable: {0}")]
    Store(#[from] DatabaseError),

    #[error("No tenant attached to this session")]
    NoTenant,

    #[error("{0}")]
    Forbidden(String),
}

/// A tenant member as stored in their clinic's `User` collection.
#[derive(Debug, Clone)]
pub struct TenantUser {
    pub id: Uuid,
    pub role: Role,
    pub email: String,
    pub store_locator: String,
    pub record: Document,
}

#[derive(Debug, Clone)]
pub enum CallerIdentity {
    SuperAdmin { email: String },
    TenantUser(TenantUser),
}

impl CallerIdentity {
    pub fn role(&self) -> Role {
        match self {
            CallerIdentity::SuperAdmin { .. } => Role::SuperAdmin,
            CallerIdentity::TenantUser(user) => user.role,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            CallerIdentity::SuperAdmin { email } => email,
            CallerIdentity::TenantUser(user) => &user.email,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub caller: CallerIdentity,
    /// Always present for tenant users; optional for the super-admin.
    pub tenant: Option<ResolvedTenant>,
}

impl TenantContext {
    pub fn entities(&self) -> Result<&Arc<EntitySet>, TenantContextError> {
        self.tenant
            .as_ref()
            .map(|t| &t.entities)
            .ok_or(TenantContextError::NoTenant)
    }

    pub fn store_locator(&self) -> Option<&str> {
        self.tenant.as_ref().map(ResolvedTenant::locator)
    }

    /// Caller's user id inside the tenant store, if it is a tenant member.
    pub fn user_id(&self) -> Option<Uuid> {
        match &self.caller {
            CallerIdentity::TenantUser(user) => Some(user.id),
            CallerIdentity::SuperAdmin { .. } => None,
        }
    }
}

/// Verify `token` and resolve the tenant it names. Only the connection cache
/// and model factory are consulted; the registry is never touched.
pub async fn resolve_tenant_context(
    token: &str,
    credentials: &dyn CredentialService,
    tenants: &dyn TenantResolver,
) -> Result<TenantContext, TenantContextError> {
    let claims = credentials.verify_token(token)?;

    if claims.is_super_admin() {
        let tenant = match claims.store_locator.as_deref() {
            Some(locator) => match tenants.resolve(locator).await {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!(
                        "Super-admin tenant {} unavailable, continuing without it: {}",
                        locator, e
                    );
                    None
                }
            },
            None => None,
        };
        return Ok(TenantContext {
            caller: CallerIdentity::SuperAdmin {
                email: claims.email,
            },
            tenant,
        });
    }
    if claims.role == Role::SuperAdmin {
        return Err(TenantContextError::InvalidSubject);
    }

    let locator = claims
        .store_locator
        .ok_or(TenantContextError::MissingTenant)?;
    let resolved = tenants.resolve(&locator).await?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| TenantContextError::InvalidSubject)?;
    let record = resolved
        .entities
        .users()
        .find_by_id(user_id)
        .await?
        .ok_or(TenantContextError::UserNotFound)?;

    let role = record
        .get("role")
        .and_then(Value::as_str)
        .and_then(|r| r.parse::<Role>().ok())
        .unwrap_or(claims.role);
    let email = record
        .get("email")
        .and_then(Value::as_str)
        .map_or(claims.email, str::to_string);

    debug!("Resolved caller {} in tenant {}", user_id, locator);
    Ok(TenantContext {
        caller: CallerIdentity::TenantUser(TenantUser {
            id: user_id,
            role,
            email,
            store_locator: locator,
            record,
        }),
        tenant: Some(resolved),
    })
}

#[async_trait]
impl FromRequestParts<AppState> for TenantContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token =
            extract_bearer_token(&parts.headers).map_err(TenantContextError::MissingToken)?;
        let context =
            resolve_tenant_context(token, state.credentials.as_ref(), state.stores.as_ref())
                .await?;
        Ok(context)
    }
}
