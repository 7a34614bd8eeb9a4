//! Configuration types for the gateway core

use std::time::Duration;

use crate::crypto::HmacKey;
use crate::retry::RetryConfig;

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Cognito user pool ID (e.g., us-east-1_xxxxx)
    pub cognito_pool_id: String,
    /// AWS region (e.g., us-east-1)
    pub aws_region: String,
    /// Cognito app client ID, the expected token audience
    pub cognito_client_id: String,
    /// Cognito app client secret, when the app client has one
    pub cognito_client_secret: Option<String>,
    /// HMAC secret for session handle signing
    pub session_secret: String,
    /// Upper bound on session lifetime (sessions never outlive their token)
    pub session_max_duration: Duration,
    /// How long a fetched signing key set is considered fresh
    pub signing_key_ttl: Duration,
    /// Minimum time between refetches triggered by unknown key ids
    pub key_refresh_cooldown: Duration,
    /// Allowed clock skew when checking token expiry
    pub clock_skew: Duration,
    /// Lifetime of a non-terminal credential flow
    pub flow_ttl: Duration,
    /// How long terminal flows are kept for audit and replay
    pub flow_retention: Duration,
    /// How long revoked sessions are kept before purge
    pub session_audit_retention: Duration,
    /// Consecutive invalid challenge answers allowed before a flow fails
    pub challenge_retry_budget: u32,
    /// Timeout for a single provider call attempt
    pub provider_timeout: Duration,
    /// Backoff policy for transient provider failures
    pub retry: RetryConfig,
    /// Override for the provider API endpoint (tests, VPC endpoints)
    pub provider_endpoint_override: Option<String>,
    /// Override for the JWKS URL (tests)
    pub jwks_url_override: Option<String>,
}

impl GatewayConfig {
    /// Create a new gateway config with default durations
    pub fn new(
        cognito_pool_id: impl Into<String>,
        aws_region: impl Into<String>,
        cognito_client_id: impl Into<String>,
        session_secret: impl Into<String>,
    ) -> Self {
        Self {
            cognito_pool_id: cognito_pool_id.into(),
            aws_region: aws_region.into(),
            cognito_client_id: cognito_client_id.into(),
            cognito_client_secret: None,
            session_secret: session_secret.into(),
            session_max_duration: Duration::from_secs(24 * 60 * 60), // 24 hours
            signing_key_ttl: Duration::from_secs(60 * 60),           // 1 hour
            key_refresh_cooldown: Duration::from_secs(30),
            clock_skew: Duration::from_secs(5),
            flow_ttl: Duration::from_secs(5 * 60),
            flow_retention: Duration::from_secs(15 * 60),
            session_audit_retention: Duration::from_secs(24 * 60 * 60),
            challenge_retry_budget: 3,
            provider_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            provider_endpoint_override: None,
            jwks_url_override: None,
        }
    }

    /// Create a config and validate it
    pub fn try_new(
        cognito_pool_id: impl Into<String>,
        aws_region: impl Into<String>,
        cognito_client_id: impl Into<String>,
        session_secret: impl Into<String>,
    ) -> Result<Self, ConfigValidationError> {
        let config = Self::new(cognito_pool_id, aws_region, cognito_client_id, session_secret);
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that cannot be expressed in the types
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.cognito_pool_id.trim().is_empty() {
            return Err(ConfigValidationError::Empty("cognito_pool_id"));
        }
        if self.aws_region.trim().is_empty() {
            return Err(ConfigValidationError::Empty("aws_region"));
        }
        if self.cognito_client_id.trim().is_empty() {
            return Err(ConfigValidationError::Empty("cognito_client_id"));
        }
        if self.session_secret.len() < HmacKey::MIN_KEY_LENGTH {
            return Err(ConfigValidationError::SessionSecretTooShort {
                actual: self.session_secret.len(),
                minimum: HmacKey::MIN_KEY_LENGTH,
            });
        }
        if self.challenge_retry_budget == 0 {
            return Err(ConfigValidationError::ZeroRetryBudget);
        }
        if self.flow_ttl.is_zero() {
            return Err(ConfigValidationError::Empty("flow_ttl"));
        }
        Ok(())
    }

    /// Get the Cognito issuer URL
    pub fn cognito_issuer(&self) -> String {
        format!(
            "https://cognito-idp.{}.amazonaws.com/{}",
            self.aws_region, self.cognito_pool_id
        )
    }

    /// Get the JWKS URL
    pub fn jwks_url(&self) -> String {
        self.jwks_url_override
            .clone()
            .unwrap_or_else(|| format!("{}/.well-known/jwks.json", self.cognito_issuer()))
    }

    /// Get the provider API endpoint
    pub fn provider_endpoint(&self) -> String {
        self.provider_endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://cognito-idp.{}.amazonaws.com/", self.aws_region))
    }

    /// Set the app client secret
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.cognito_client_secret = Some(secret.into());
        self
    }

    /// Set the maximum session duration
    pub fn with_session_max_duration(mut self, duration: Duration) -> Self {
        self.session_max_duration = duration;
        self
    }

    /// Set signing key TTL
    pub fn with_signing_key_ttl(mut self, ttl: Duration) -> Self {
        self.signing_key_ttl = ttl;
        self
    }

    /// Set the unknown-key refetch cooldown
    pub fn with_key_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.key_refresh_cooldown = cooldown;
        self
    }

    /// Set allowed clock skew
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Set flow lifetime
    pub fn with_flow_ttl(mut self, ttl: Duration) -> Self {
        self.flow_ttl = ttl;
        self
    }

    /// Set terminal flow retention
    pub fn with_flow_retention(mut self, retention: Duration) -> Self {
        self.flow_retention = retention;
        self
    }

    /// Set revoked session audit retention
    pub fn with_session_audit_retention(mut self, retention: Duration) -> Self {
        self.session_audit_retention = retention;
        self
    }

    /// Set the challenge retry budget
    pub fn with_challenge_retry_budget(mut self, budget: u32) -> Self {
        self.challenge_retry_budget = budget;
        self
    }

    /// Set the per-attempt provider timeout
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Set the transient failure retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Point the provider client at a different endpoint
    pub fn with_provider_endpoint_override(mut self, endpoint: impl Into<String>) -> Self {
        self.provider_endpoint_override = Some(endpoint.into());
        self
    }

    /// Point key fetching at a different JWKS URL
    pub fn with_jwks_url_override(mut self, url: impl Into<String>) -> Self {
        self.jwks_url_override = Some(url.into());
        self
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("cognito_pool_id", &self.cognito_pool_id)
            .field("aws_region", &self.aws_region)
            .field("cognito_client_id", &self.cognito_client_id)
            .field(
                "cognito_client_secret",
                &self.cognito_client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("session_secret", &"[REDACTED]")
            .field("session_max_duration", &self.session_max_duration)
            .field("signing_key_ttl", &self.signing_key_ttl)
            .field("flow_ttl", &self.flow_ttl)
            .field("challenge_retry_budget", &self.challenge_retry_budget)
            .field("provider_timeout", &self.provider_timeout)
            .finish_non_exhaustive()
    }
}

/// Invalid gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("session secret too short: got {actual} bytes, need at least {minimum}")]
    SessionSecretTooShort { actual: usize, minimum: usize },

    #[error("challenge retry budget must be at least 1")]
    ZeroRetryBudget,
}
