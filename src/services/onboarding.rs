//! Clinic signup, member join and login. Every path ends with a token that
//! pins the caller to a tenant store.

use std::sync::Arc;

use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Claims, CredentialService, Role, SUPER_ADMIN_SUBJECT};
use crate::database::driver::{document_id, Document};
use crate::database::manager::DatabaseError;
use crate::database::models::{redact_user, EntityName};
use crate::database::stores::{ResolvedTenant, TenantResolver};
use crate::registry::naming::normalize_email;
use crate::registry::{RegistryError, TenantRecord, TenantRegistry, TenantSummary};
use crate::services::notification::Notifier;

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("{0}")]
    Validation(String),

    #[error("An account with this email already exists in this clinic")]
    EmailTaken,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Background task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClinicRequest {
    pub clinic_name: String,
    pub admin_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinClinicRequest {
    pub join_code: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub join_code: Option<String>,
}

/// Issued token plus what the client needs to render the session.
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub token: String,
    pub user: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clinic: Option<TenantSummary>,
}

pub struct OnboardingService {
    registry: TenantRegistry,
    tenants: Arc<dyn TenantResolver>,
    credentials: Arc<dyn CredentialService>,
    notifier: Arc<dyn Notifier>,
}

impl OnboardingService {
    pub fn new(
        registry: TenantRegistry,
        tenants: Arc<dyn TenantResolver>,
        credentials: Arc<dyn CredentialService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            registry,
            tenants,
            credentials,
            notifier,
        }
    }

    /// New clinic with its administrator. The tenant store is provisioned and
    /// usable before the clinic can be found by join code.
    pub async fn create_clinic(
        &self,
        request: CreateClinicRequest,
    ) -> Result<AuthSession, OnboardingError> {
        let email = validate_email(&request.email)?;
        validate_password(&request.password)?;
        let admin_name = require("admin_name", &request.admin_name)?;

        let tenant = self
            .registry
            .create_tenant(&request.clinic_name, &email)
            .await?;

        match self
            .populate_clinic(&tenant, admin_name, &email, &request.password)
            .await
        {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(
                    "Onboarding for tenant {} failed, disabling it: {}",
                    tenant.slug, e
                );
                if let Err(disable) = self.registry.deactivate(&tenant.slug).await {
                    warn!("Failed to disable tenant {}: {}", tenant.slug, disable);
                }
                Err(e)
            }
        }
    }

    async fn populate_clinic(
        &self,
        tenant: &TenantRecord,
        admin_name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthSession, OnboardingError> {
        self.tenants.provision(&tenant.store_locator).await?;
        let resolved = self.tenants.resolve(&tenant.store_locator).await?;

        let code = verification_code();
        let admin = self
            .insert_user(&resolved, admin_name, email, password, Role::Admin, &code)
            .await?;
        let admin_id = document_id(&admin).map(|id| id.to_string()).unwrap_or_default();

        resolved
            .entities
            .get(EntityName::ClinicProfile)
            .insert(object(json!({
                "name": tenant.display_name,
                "slug": tenant.slug,
                "join_code": tenant.join_code,
                "owner_user_id": admin_id,
                "email": email,
            })))
            .await?;

        info!("Created clinic {} with administrator {}", tenant.slug, email);
        self.notify(email, &code, &admin_id).await;
        self.session(&admin, Role::Admin, Some(tenant))
    }

    /// Doctor or patient signup into an existing clinic selected by join code.
    pub async fn join_clinic(
        &self,
        request: JoinClinicRequest,
    ) -> Result<AuthSession, OnboardingError> {
        let email = validate_email(&request.email)?;
        validate_password(&request.password)?;
        let name = require("name", &request.name)?;
        if !matches!(request.role, Role::Doctor | Role::Patient) {
            return Err(OnboardingError::Validation(
                "Role must be doctor or patient".to_string(),
            ));
        }

        let tenant = self.registry.find_by_join_code(&request.join_code).await?;
        let resolved = self.tenants.resolve(&tenant.store_locator).await?;

        if resolved
            .entities
            .users()
            .find_one(&object(json!({ "email": email })))
            .await?
            .is_some()
        {
            return Err(OnboardingError::EmailTaken);
        }

        let code = verification_code();
        let user = self
            .insert_user(&resolved, name, &email, &request.password, request.role, &code)
            .await?;
        let user_id = document_id(&user).map(|id| id.to_string()).unwrap_or_default();

        let detail = match request.role {
            Role::Doctor => EntityName::DoctorDetail,
            _ => EntityName::PatientDetail,
        };
        resolved
            .entities
            .get(detail)
            .insert(object(json!({ "user_id": user_id })))
            .await?;

        info!("{} {} joined clinic {}", request.role, email, tenant.slug);
        self.notify(&email, &code, &user_id).await;
        self.session(&user, request.role, Some(&tenant))
    }

    /// With a join code only that clinic is checked; otherwise every active
    /// clinic is scanned and the first matching account wins.
    pub async fn login(&self, request: LoginRequest) -> Result<AuthSession, OnboardingError> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(OnboardingError::InvalidCredentials);
        }

        let join_code = request.join_code.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let scoped = join_code.is_some();
        let candidates = match join_code {
            Some(code) => vec![self.registry.find_by_join_code(code).await?],
            None => {
                let tenants = self.registry.list_active().await?;
                debug!("Login without clinic code: scanning {} tenants", tenants.len());
                tenants
            }
        };

        for tenant in &candidates {
            let resolved = match self.tenants.resolve(&tenant.store_locator).await {
                Ok(resolved) => resolved,
                Err(e) if !scoped => {
                    warn!("Skipping tenant {} during login scan: {}", tenant.slug, e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let Some(user) = resolved
                .entities
                .users()
                .find_one(&object(json!({ "email": email })))
                .await?
            else {
                continue;
            };

            let hash = user
                .get("password_hash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if !self.verify_password(&request.password, &hash).await? {
                continue;
            }

            let role = user
                .get("role")
                .and_then(Value::as_str)
                .and_then(|r| r.parse::<Role>().ok())
                .unwrap_or(Role::Patient);
            info!("{} logged in to clinic {}", email, tenant.slug);
            return self.session(&user, role, Some(tenant));
        }

        Err(OnboardingError::InvalidCredentials)
    }

    /// Registry-backed super-admin login. A join code scopes the token to that clinic.
    pub async fn super_admin_login(
        &self,
        request: LoginRequest,
    ) -> Result<AuthSession, OnboardingError> {
        let Some(admin) = self.registry.find_super_admin(&request.email).await? else {
            return Err(OnboardingError::InvalidCredentials);
        };
        if !self
            .verify_password(&request.password, &admin.password_hash)
            .await?
        {
            return Err(OnboardingError::InvalidCredentials);
        }

        let tenant = match request.join_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(code) => Some(self.registry.find_by_join_code(code).await?),
            None => None,
        };

        let claims = Claims::new(
            SUPER_ADMIN_SUBJECT,
            Role::SuperAdmin,
            admin.email.clone(),
            tenant.as_ref().map(|t| t.store_locator.clone()),
        );
        let token = self.credentials.sign_token(claims)?;
        info!("Super-admin {} logged in", admin.email);

        Ok(AuthSession {
            token,
            user: object(json!({ "email": admin.email, "role": Role::SuperAdmin })),
            clinic: tenant.as_ref().map(TenantSummary::from),
        })
    }

    /// Hash on the blocking pool; bcrypt is deliberately slow.
    pub async fn hash_password(&self, password: &str) -> Result<String, OnboardingError> {
        let credentials = self.credentials.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || credentials.hash_password(&password))
            .await
            .map_err(|e| OnboardingError::Task(e.to_string()))?
            .map_err(OnboardingError::from)
    }

    async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, OnboardingError> {
        if hash.is_empty() {
            return Ok(false);
        }
        let credentials = self.credentials.clone();
        let (password, hash) = (password.to_string(), hash.to_string());
        let verified =
            tokio::task::spawn_blocking(move || credentials.verify_password(&password, &hash))
                .await
                .map_err(|e| OnboardingError::Task(e.to_string()))?;
        // A malformed stored hash is a failed login, not a server error
        Ok(verified.unwrap_or(false))
    }

    async fn insert_user(
        &self,
        resolved: &ResolvedTenant,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
        verification_code: &str,
    ) -> Result<Document, OnboardingError> {
        let password_hash = self.hash_password(password).await?;
        let user = object(json!({
            "name": name,
            "email": email,
            "role": role,
            "password_hash": password_hash,
            "is_verified": false,
            "verification_code": verification_code,
        }));

        resolved
            .entities
            .users()
            .insert(user)
            .await
            .map_err(|e| match e {
                DatabaseError::Duplicate { .. } => OnboardingError::EmailTaken,
                other => other.into(),
            })
    }

    async fn notify(&self, email: &str, code: &str, user_ref: &str) {
        if !self
            .notifier
            .send_verification_code(email, code, user_ref)
            .await
        {
            warn!("Verification code delivery to {} failed", email);
        }
    }

    fn session(
        &self,
        user: &Document,
        role: Role,
        tenant: Option<&TenantRecord>,
    ) -> Result<AuthSession, OnboardingError> {
        let subject = document_id(user)
            .map(|id| id.to_string())
            .ok_or_else(|| OnboardingError::Validation("User record has no id".to_string()))?;
        let email = user
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let claims = Claims::new(
            subject,
            role,
            email,
            tenant.map(|t| t.store_locator.clone()),
        );
        let token = self.credentials.sign_token(claims)?;

        Ok(AuthSession {
            token,
            user: redact_user(user.clone()),
            clinic: tenant.map(TenantSummary::from),
        })
    }
}

fn object(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn verification_code() -> String {
    format!("{:06}", thread_rng().gen_range(0..1_000_000))
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str, OnboardingError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(OnboardingError::Validation(format!("{field} is required")));
    }
    Ok(value)
}

fn validate_email(email: &str) -> Result<String, OnboardingError> {
    let email = normalize_email(email);
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(OnboardingError::Validation(
            "A valid email address is required".to_string(),
        ));
    }
    Ok(email)
}

fn validate_password(password: &str) -> Result<(), OnboardingError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(OnboardingError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;

    fn clinic(name: &str, email: &str) -> CreateClinicRequest {
        CreateClinicRequest {
            clinic_name: name.to_string(),
            admin_name: "Dr. Admin".to_string(),
            email: email.to_string(),
            password: "password123".to_string(),
        }
    }

    fn join(code: &str, email: &str, role: Role) -> JoinClinicRequest {
        JoinClinicRequest {
            join_code: code.to_string(),
            name: "Member".to_string(),
            email: email.to_string(),
            password: "password123".to_string(),
            role,
        }
    }

    fn login(email: &str, join_code: Option<&str>) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: "password123".to_string(),
            join_code: join_code.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn clinic_signup_pins_token_to_new_store() {
        let ctx = TestContext::new();
        let session = ctx
            .onboarding
            .create_clinic(clinic("Sunrise Clinic", "admin@sunrise.com"))
            .await
            .unwrap();

        let claims = ctx.credentials.verify_token(&session.token).unwrap();
        let tenant = ctx.registry.find_by_slug("sunrise_clinic").await.unwrap();
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.store_locator.as_deref(), Some(tenant.store_locator.as_str()));
        assert!(!session.user.contains_key("password_hash"));
        assert_eq!(session.clinic.unwrap().join_code, tenant.join_code);

        let resolved = ctx.stores.resolve(&tenant.store_locator).await.unwrap();
        let profiles = resolved.entities.get(EntityName::ClinicProfile);
        assert_eq!(profiles.count(&Document::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_clinic_name_is_rejected() {
        let ctx = TestContext::new();
        ctx.onboarding
            .create_clinic(clinic("Sunrise Clinic", "admin@sunrise.com"))
            .await
            .unwrap();

        let err = ctx
            .onboarding
            .create_clinic(clinic("Sunrise Clinic", "other@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Registry(RegistryError::SlugTaken(_))));
    }

    #[tokio::test]
    async fn doctor_joins_by_code_and_lands_in_same_store() {
        let ctx = TestContext::new();
        let admin = ctx
            .onboarding
            .create_clinic(clinic("Sunrise Clinic", "admin@sunrise.com"))
            .await
            .unwrap();
        let code = admin.clinic.unwrap().join_code;

        let doctor = ctx
            .onboarding
            .join_clinic(join(&code.to_lowercase(), "doc@x.com", Role::Doctor))
            .await
            .unwrap();

        let admin_claims = ctx.credentials.verify_token(&admin.token).unwrap();
        let doctor_claims = ctx.credentials.verify_token(&doctor.token).unwrap();
        assert_eq!(doctor_claims.store_locator, admin_claims.store_locator);
        assert_eq!(doctor_claims.role, Role::Doctor);

        let locator = doctor_claims.store_locator.unwrap();
        let resolved = ctx.stores.resolve(&locator).await.unwrap();
        let details = resolved.entities.get(EntityName::DoctorDetail);
        assert_eq!(details.count(&Document::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn emails_are_unique_per_clinic_only() {
        let ctx = TestContext::new();
        let a = ctx
            .onboarding
            .create_clinic(clinic("Clinic A", "a-admin@x.com"))
            .await
            .unwrap()
            .clinic
            .unwrap();
        let b = ctx
            .onboarding
            .create_clinic(clinic("Clinic B", "b-admin@x.com"))
            .await
            .unwrap()
            .clinic
            .unwrap();

        ctx.onboarding
            .join_clinic(join(&a.join_code, "a@x.com", Role::Patient))
            .await
            .unwrap();
        ctx.onboarding
            .join_clinic(join(&b.join_code, "a@x.com", Role::Patient))
            .await
            .unwrap();

        let err = ctx
            .onboarding
            .join_clinic(join(&a.join_code, "A@X.com", Role::Doctor))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::EmailTaken));
    }

    #[tokio::test]
    async fn invalid_join_code_is_not_found() {
        let ctx = TestContext::new();
        let err = ctx
            .onboarding
            .join_clinic(join("NOPE22", "doc@x.com", Role::Doctor))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Registry(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn admin_role_cannot_join() {
        let ctx = TestContext::new();
        let err = ctx
            .onboarding
            .join_clinic(join("ABCDEF", "x@x.com", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardingError::Validation(_)));
    }

    #[tokio::test]
    async fn login_scans_or_uses_join_code() {
        let ctx = TestContext::new();
        ctx.onboarding
            .create_clinic(clinic("Clinic A", "a-admin@x.com"))
            .await
            .unwrap();
        let b = ctx
            .onboarding
            .create_clinic(clinic("Clinic B", "b-admin@x.com"))
            .await
            .unwrap()
            .clinic
            .unwrap();

        let scanned = ctx.onboarding.login(login("B-Admin@x.com", None)).await.unwrap();
        assert_eq!(scanned.clinic.unwrap().slug, "clinic_b");

        let scoped = ctx
            .onboarding
            .login(login("b-admin@x.com", Some(b.join_code.as_str())))
            .await
            .unwrap();
        assert_eq!(scoped.clinic.unwrap().slug, "clinic_b");

        let mut wrong = login("b-admin@x.com", None);
        wrong.password = "not-the-password".to_string();
        assert!(matches!(
            ctx.onboarding.login(wrong).await,
            Err(OnboardingError::InvalidCredentials)
        ));
        assert!(matches!(
            ctx.onboarding.login(login("nobody@x.com", None)).await,
            Err(OnboardingError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn super_admin_login_optionally_scopes_tenant() {
        let ctx = TestContext::new();
        let code = ctx
            .onboarding
            .create_clinic(clinic("Sunrise Clinic", "admin@sunrise.com"))
            .await
            .unwrap()
            .clinic
            .unwrap()
            .join_code;
        let hash = ctx.onboarding.hash_password("password123").await.unwrap();
        ctx.registry
            .provision_super_admin("root@x.com", &hash)
            .await
            .unwrap();

        let bare = ctx
            .onboarding
            .super_admin_login(login("root@x.com", None))
            .await
            .unwrap();
        let claims = ctx.credentials.verify_token(&bare.token).unwrap();
        assert!(claims.is_super_admin());
        assert!(claims.store_locator.is_none());

        let scoped = ctx
            .onboarding
            .super_admin_login(login("root@x.com", Some(code.as_str())))
            .await
            .unwrap();
        let claims = ctx.credentials.verify_token(&scoped.token).unwrap();
        assert!(claims.store_locator.is_some());

        assert!(matches!(
            ctx.onboarding
                .super_admin_login(login("admin@sunrise.com", None))
                .await,
            Err(OnboardingError::InvalidCredentials)
        ));
    }

    #[test]
    fn validates_signup_input() {
        assert_eq!(validate_email(" Ada@Clinic.org ").unwrap(), "ada@clinic.org");
        for bad in ["", "ada", "@x.com", "ada@x", "ada@.com", "a b@x.com"] {
            assert!(validate_email(bad).is_err(), "{bad}");
        }
        assert!(validate_password("short").is_err());
        assert!(require("name", "   ").is_err());
        assert_eq!(verification_code().len(), 6);
    }
}
