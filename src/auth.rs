//! Bearer-token validation against an identity provider's JWKS.
//!
//! Tokens are verified with `jsonwebtoken`: the signing key is selected by
//! the header's `kid`, and issuer, audience and expiry are enforced. The
//! algorithm is pinned to the key's declared `alg`; keys without one accept
//! only the asymmetric algorithms in [`DEFAULT_ALGORITHMS`]. The key set is
//! fetched lazily and re-fetched when a token names an unknown `kid` (key
//! rotation), at most once per [`MIN_REFRESH_INTERVAL`].

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::config::AuthConfig;

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    Disabled,
    UnknownKey(String),
    InvalidToken(String),
    Jwks(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing bearer token"),
            AuthError::Disabled => write!(f, "login is not configured"),
            AuthError::UnknownKey(kid) => write!(f, "no signing key for kid {:?}", kid),
            AuthError::InvalidToken(e) => write!(f, "invalid token: {}", e),
            AuthError::Jwks(e) => write!(f, "failed to fetch signing keys: {}", e),
        }
    }
}

impl std::error::Error for AuthError {}

/// The signed-in user, as asserted by the identity provider.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Identity {
    pub email: String,
    pub name: String,
    pub subject: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    upn: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    oid: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

impl Claims {
    fn into_identity(self) -> Result<Identity, AuthError> {
        let email = self
            .email
            .or(self.preferred_username)
            .or(self.upn)
            .ok_or_else(|| AuthError::InvalidToken("token carries no email claim".to_string()))?;
        Ok(Identity {
            name: self.name.unwrap_or_else(|| email.clone()),
            subject: self.oid.or(self.sub).unwrap_or_default(),
            email,
        })
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingToken)?.trim();
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token.trim())
}

/// Algorithms accepted for keys that do not declare an `alg`.
pub const DEFAULT_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Minimum time between two key-set fetches.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

enum KeySource {
    Remote { url: String, client: reqwest::Client },
    Static,
}

pub struct TokenVerifier {
    issuer: String,
    audience: String,
    source: KeySource,
    keys: RwLock<Option<JwkSet>>,
    last_refresh: Mutex<Option<Instant>>,
}

impl TokenVerifier {
    /// Returns `None` when login is not configured.
    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Option<Self>> {
        let (Some(url), Some(issuer), Some(audience)) =
            (&config.jwks_url, &config.issuer, &config.audience)
        else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Some(Self {
            issuer: issuer.clone(),
            audience: audience.clone(),
            source: KeySource::Remote {
                url: url.clone(),
                client,
            },
            keys: RwLock::new(None),
            last_refresh: Mutex::new(None),
        }))
    }

    /// A verifier with a fixed key set and no network access.
    pub fn with_keys(issuer: &str, audience: &str, keys: JwkSet) -> Self {
        Self {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            source: KeySource::Static,
            keys: RwLock::new(Some(keys)),
            last_refresh: Mutex::new(None),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| AuthError::InvalidToken("token header has no kid".to_string()))?;

        let (key, declared) = match self.key_for(&kid).await? {
            Some(found) => found,
            None => {
                self.refresh().await?;
                self.key_for(&kid)
                    .await?
                    .ok_or_else(|| AuthError::UnknownKey(kid.clone()))?
            }
        };

        let algorithm = match declared {
            Some(alg) if alg == header.alg => alg,
            Some(alg) => {
                return Err(AuthError::InvalidToken(format!(
                    "token algorithm {:?} does not match key algorithm {:?}",
                    header.alg, alg
                )))
            }
            None if DEFAULT_ALGORITHMS.contains(&header.alg) => header.alg,
            None => {
                return Err(AuthError::InvalidToken(format!(
                    "algorithm {:?} is not accepted",
                    header.alg
                )))
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        data.claims.into_identity()
    }

    async fn key_for(
        &self,
        kid: &str,
    ) -> Result<Option<(DecodingKey, Option<Algorithm>)>, AuthError> {
        let keys = self.keys.read().await;
        let Some(jwk) = keys.as_ref().and_then(|set| set.find(kid)) else {
            return Ok(None);
        };
        let declared = declared_algorithm(jwk)?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Some((key, declared)))
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let KeySource::Remote { url, client } = &self.source else {
            return Ok(());
        };
        let mut last = self.last_refresh.lock().await;
        if let Some(at) = *last {
            if at.elapsed() < MIN_REFRESH_INTERVAL {
                tracing::debug!(url = %url, "signing keys fetched recently, not refetching");
                return Ok(());
            }
        }
        *last = Some(Instant::now());
        tracing::info!(url = %url, "fetching signing keys");
        let set: JwkSet = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?;
        *self.keys.write().await = Some(set);
        Ok(())
    }
}

/// The signing algorithm a JWK declares, `None` when it declares none.
fn declared_algorithm(jwk: &Jwk) -> Result<Option<Algorithm>, AuthError> {
    let Some(declared) = &jwk.common.key_algorithm else {
        return Ok(None);
    };
    let alg = match declared {
        KeyAlgorithm::HS256 => Algorithm::HS256,
        KeyAlgorithm::HS384 => Algorithm::HS384,
        KeyAlgorithm::HS512 => Algorithm::HS512,
        KeyAlgorithm::ES256 => Algorithm::ES256,
        KeyAlgorithm::ES384 => Algorithm::ES384,
        KeyAlgorithm::RS256 => Algorithm::RS256,
        KeyAlgorithm::RS384 => Algorithm::RS384,
        KeyAlgorithm::RS512 => Algorithm::RS512,
        KeyAlgorithm::PS256 => Algorithm::PS256,
        KeyAlgorithm::PS384 => Algorithm::PS384,
        KeyAlgorithm::PS512 => Algorithm::PS512,
        KeyAlgorithm::EdDSA => Algorithm::EdDSA,
        other => {
            return Err(AuthError::InvalidToken(format!(
                "key algorithm {:?} cannot verify signatures",
                other
            )))
        }
    };
    Ok(Some(alg))
}
