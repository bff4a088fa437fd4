use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Subject carried by the super-admin token instead of a tenant user id.
pub const SUPER_ADMIN_SUBJECT: &str = "super_admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Doctor => "doctor",
            Role::Patient => "patient",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(AuthError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Tenant user id, or [`SUPER_ADMIN_SUBJECT`].
    pub sub: String,
    pub role: Role,
    pub email: String,
    /// Absent (or the legacy value "none") for a super-admin without a tenant.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "locator_or_none"
    )]
    pub store_locator: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    /// Unsigned claims; `iat`/`exp` are stamped by [`CredentialService::sign_token`].
    pub fn new(
        sub: impl Into<String>,
        role: Role,
        email: impl Into<String>,
        store_locator: Option<String>,
    ) -> Self {
        Self {
            sub: sub.into(),
            role,
            email: email.into(),
            store_locator,
            exp: 0,
            iat: 0,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin && self.sub == SUPER_ADMIN_SUBJECT
    }
}

fn locator_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty() && s != "none"))
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT secret not configured")]
    MissingSecret,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("JWT generation error: {0}")]
    TokenEncoding(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// Password hashing and token signing, consumed as an opaque collaborator.
pub trait CredentialService: Send + Sync {
    fn hash_password(&self, plain: &str) -> Result<String, AuthError>;

    fn verify_password(&self, plain: &str, hash: &str) -> Result<bool, AuthError>;

    /// Stamp `iat`/`exp` and sign.
    fn sign_token(&self, claims: Claims) -> Result<String, AuthError>;

    fn verify_token(&self, token: &str) -> Result<Claims, AuthError>;
}

/// bcrypt at `cost`. Used directly by tooling that has no signing secret.
pub fn hash_password(plain: &str, cost: u32) -> Result<String, AuthError> {
    bcrypt::hash(plain, cost).map_err(|e| AuthError::Hashing(e.to_string()))
}

/// HS256 tokens plus bcrypt password hashes.
pub struct JwtCredentials {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry: Duration,
    bcrypt_cost: u32,
}

impl JwtCredentials {
    pub fn new(secret: &str, expiry_hours: i64, bcrypt_cost: u32) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::hours(expiry_hours),
            bcrypt_cost,
        })
    }
}

impl CredentialService for JwtCredentials {
    fn hash_password(&self, plain: &str) -> Result<String, AuthError> {
        hash_password(plain, self.bcrypt_cost)
    }

    fn verify_password(&self, plain: &str, hash: &str) -> Result<bool, AuthError> {
        bcrypt::verify(plain, hash).map_err(|e| AuthError::Hashing(e.to_string()))
    }

    fn sign_token(&self, mut claims: Claims) -> Result<String, AuthError> {
        let now = Utc::now();
        claims.iat = now.timestamp();
        claims.exp = (now + self.expiry).timestamp();

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenEncoding(e.to_string()))
    }

    fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}
