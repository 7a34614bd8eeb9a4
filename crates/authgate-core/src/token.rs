//! Signed token validation

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::clock::{saturating_add, Clock};
use crate::config::GatewayConfig;
use crate::crypto::constant_time_str_eq;
use crate::error::TokenError;
use crate::keys::KeyCache;
use crate::provider::IdentityProvider;

/// Decoded token
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Encoded form as received
    pub raw: String,
    pub issuer: String,
    /// `client_id` for access tokens, `aud` for id tokens
    pub audience: String,
    pub subject: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub key_id: String,
    /// Every claim in the payload, including the ones above
    pub claims: Map<String, Value>,
}

impl Token {
    /// Provider username, falling back to the subject
    pub fn username(&self) -> &str {
        self.claim_str("username")
            .or_else(|| self.claim_str("cognito:username"))
            .unwrap_or(&self.subject)
    }

    /// `access` or `id`
    pub fn token_use(&self) -> Option<&str> {
        self.claim_str("token_use")
    }

    pub fn email(&self) -> Option<&str> {
        self.claim_str("email")
    }

    /// Group memberships
    pub fn groups(&self) -> Vec<String> {
        match self.claims.get("cognito:groups") {
            Some(Value::Array(groups)) => groups
                .iter()
                .filter_map(|g| g.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

/// A token that passed every check
///
/// Only [`TokenValidator`] can construct one, so holding a `ValidatedToken`
/// is proof of validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedToken(Token);

impl ValidatedToken {
    pub(crate) fn new(token: Token) -> Self {
        Self(token)
    }

    pub fn token(&self) -> &Token {
        &self.0
    }

    pub fn into_inner(self) -> Token {
        self.0
    }

    pub fn subject(&self) -> &str {
        &self.0.subject
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.0.expires_at
    }
}

impl std::ops::Deref for ValidatedToken {
    type Target = Token;

    fn deref(&self) -> &Token {
        &self.0
    }
}

/// Token validator backed by the shared signing key cache
///
/// Checks run cheapest first: structure, then expiry on the unverified
/// payload, then key lookup, signature, issuer and audience. A token that is
/// malformed or already expired never reaches the key cache.
pub struct TokenValidator<P: IdentityProvider> {
    keys: Arc<KeyCache<P>>,
    clock: Arc<dyn Clock>,
    issuer: String,
    audience: String,
    clock_skew: Duration,
}

impl<P: IdentityProvider> TokenValidator<P> {
    pub fn new(config: &GatewayConfig, provider: Arc<P>, clock: Arc<dyn Clock>) -> Self {
        let keys = KeyCache::new(
            provider,
            Arc::clone(&clock),
            config.signing_key_ttl,
            config.key_refresh_cooldown,
        )
        .with_fetch_policy(config.retry.clone(), config.provider_timeout);

        Self::with_key_cache(config, Arc::new(keys), clock)
    }

    /// Build a validator on an existing key cache
    pub fn with_key_cache(
        config: &GatewayConfig,
        keys: Arc<KeyCache<P>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            clock,
            issuer: config.cognito_issuer(),
            audience: config.cognito_client_id.clone(),
            clock_skew: config.clock_skew,
        }
    }

    pub fn keys(&self) -> &Arc<KeyCache<P>> {
        &self.keys
    }

    /// Validate an encoded token
    pub async fn validate(&self, raw: &str) -> Result<ValidatedToken, TokenError> {
        let header = decode_header(raw).map_err(|e| {
            tracing::debug!("Failed to decode token header: {}", e);
            TokenError::Malformed
        })?;

        if header.alg != Algorithm::RS256 {
            tracing::debug!(alg = ?header.alg, "Unsupported token algorithm");
            return Err(TokenError::Malformed);
        }

        let kid = header.kid.ok_or_else(|| {
            tracing::debug!("Token missing kid");
            TokenError::Malformed
        })?;

        // Expiry first: a stale token must not cost a key lookup
        let unverified = unverified_claims(raw)?;
        let expires_at = timestamp_claim(&unverified, "exp")?.ok_or(TokenError::Malformed)?;
        self.check_expiry(expires_at)?;

        let key = self.keys.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        // Expiry uses the injected clock, audience is compared below
        validation.validate_exp = false;
        validation.validate_aud = false;

        let claims = decode::<Map<String, Value>>(raw, &key, &validation)
            .map_err(|e| {
                tracing::debug!("Token verification failed: {}", e);
                match e.kind() {
                    JwtErrorKind::InvalidSignature | JwtErrorKind::InvalidAlgorithm => {
                        TokenError::BadSignature
                    }
                    JwtErrorKind::InvalidIssuer => TokenError::IssuerMismatch,
                    _ => TokenError::Malformed,
                }
            })?
            .claims;

        // Time may have moved during a key refresh
        self.check_expiry(expires_at)?;

        let audience = claims
            .get("client_id")
            .or_else(|| claims.get("aud"))
            .and_then(Value::as_str)
            .ok_or(TokenError::AudienceMismatch)?;

        if !constant_time_str_eq(audience, &self.audience) {
            tracing::debug!("Token audience does not match the configured client");
            return Err(TokenError::AudienceMismatch);
        }

        let token = Token {
            raw: raw.to_string(),
            issuer: string_claim(&claims, "iss")?,
            audience: audience.to_string(),
            subject: string_claim(&claims, "sub")?,
            issued_at: timestamp_claim(&claims, "iat")?,
            expires_at,
            key_id: kid,
            claims,
        };

        Ok(ValidatedToken::new(token))
    }

    fn check_expiry(&self, expires_at: DateTime<Utc>) -> Result<(), TokenError> {
        let now = self.clock.now();
        if now > saturating_add(expires_at, self.clock_skew) {
            tracing::debug!(%expires_at, %now, "Token expired");
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

impl<P: IdentityProvider> std::fmt::Debug for TokenValidator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("issuer", &self.issuer)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

/// Payload without signature verification, for the pre-check only
fn unverified_claims(raw: &str) -> Result<Map<String, Value>, TokenError> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<Map<String, Value>>(raw, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Failed to decode token payload: {}", e);
            TokenError::Malformed
        })
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Result<String, TokenError> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(TokenError::Malformed)
}

fn timestamp_claim(
    claims: &Map<String, Value>,
    name: &str,
) -> Result<Option<DateTime<Utc>>, TokenError> {
    match claims.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(Some)
            .ok_or(TokenError::Malformed),
    }
}
