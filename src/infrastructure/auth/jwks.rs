//! JWKS-backed verifier for asymmetric tokens.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey};
use parking_lot::RwLock;

use super::{AuthError, ClaimRules, Claims, TokenVerifier, VerifiedToken};

/// Cached key sets are refetched after this long
const JWKS_TTL: Duration = Duration::from_secs(600);

/// Minimum spacing between refetches triggered by unknown key ids
const JWKS_MIN_REFRESH: Duration = Duration::from_secs(30);

const ALLOWED_ALGORITHMS: [Algorithm; 7] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

struct CachedKeys {
    fetched_at: Instant,
    keys: JwkSet,
}

pub struct JwksVerifier {
    url: String,
    http: reqwest::Client,
    rules: ClaimRules,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksVerifier {
    pub fn new(url: impl Into<String>, rules: ClaimRules) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            http,
            rules,
            cache: RwLock::new(None),
        })
    }

    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let keys = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

        tracing::debug!(url = %self.url, keys = keys.keys.len(), "Fetched JWKS");
        *self.cache.write() = Some(CachedKeys {
            fetched_at: Instant::now(),
            keys: keys.clone(),
        });
        Ok(keys)
    }

    /// Resolve the decoding key for `kid`, refetching when stale or unknown.
    async fn key_for(&self, kid: Option<&str>) -> Result<DecodingKey, AuthError> {
        let (cached, age) = {
            let cache = self.cache.read();
            match cache.as_ref() {
                Some(c) => (Some(c.keys.clone()), c.fetched_at.elapsed()),
                None => (None, Duration::MAX),
            }
        };

        if let Some(keys) = cached.as_ref().filter(|_| age < JWKS_TTL) {
            if let Some(key) = select(keys, kid)? {
                return Ok(key);
            }
            if age < JWKS_MIN_REFRESH {
                return Err(AuthError::Invalid("unknown signing key".into()));
            }
        }

        let keys = self.fetch().await?;
        select(&keys, kid)?.ok_or_else(|| AuthError::Invalid("unknown signing key".into()))
    }
}

fn select(keys: &JwkSet, kid: Option<&str>) -> Result<Option<DecodingKey>, AuthError> {
    let jwk = match kid {
        Some(kid) => keys.find(kid),
        None if keys.keys.len() == 1 => keys.keys.first(),
        None => None,
    };
    jwk.map(|jwk| DecodingKey::from_jwk(jwk).map_err(AuthError::from))
        .transpose()
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let header = decode_header(token)?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::Invalid(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }

        let key = self.key_for(header.kid.as_deref()).await?;
        let data = decode::<Claims>(token, &key, &self.rules.validation(header.alg))?;
        data.claims.try_into()
    }
}
