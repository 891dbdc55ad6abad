//! Bearer token verification.
//!
//! The authentication collaborator issues JWTs; this module only verifies
//! them. Two verifiers are provided:
//! - `JwtVerifier`: shared HS256 secret (development, tests, simple deployments)
//! - `JwksVerifier`: asymmetric keys fetched from `AUTH_JWKS_URL`

pub mod jwks;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use jwks::JwksVerifier;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(e.to_string()),
        }
    }
}

/// JWT claims accepted from the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user UUID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// The identity a valid token resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub user_id: Uuid,
    /// Username claim, unsanitized
    pub username: Option<String>,
}

impl TryFrom<Claims> for VerifiedToken {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AuthError::Invalid("subject is not a UUID".into()))?;
        Ok(Self {
            user_id,
            username: claims.preferred_username.or(claims.username),
        })
    }
}

/// `verify(token) -> user | invalid`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError>;
}

/// Optional issuer/audience checks shared by both verifiers.
#[derive(Debug, Clone, Default)]
pub struct ClaimRules {
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl ClaimRules {
    pub(crate) fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// HS256 shared-secret verifier.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, rules: ClaimRules) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: rules.validation(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        data.claims.try_into()
    }
}
