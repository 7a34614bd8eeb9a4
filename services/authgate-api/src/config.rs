//! Configuration for the gateway HTTP service.

use std::time::Duration;

use authgate_core::GatewayConfig;

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub http_port: u16,

    /// Gateway core configuration
    pub gateway: GatewayConfig,

    /// Request timeout for API routes
    pub request_timeout: Duration,

    /// How often expired flows and sessions are purged
    pub purge_interval: Duration,

    /// Credential requests allowed per client IP per minute
    pub rate_limit_per_minute: u32,

    /// Metrics enabled
    pub metrics_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_port = parse_or(&lookup, "HTTP_PORT", 8080)?;

        // Cognito configuration
        let pool_id =
            lookup("COGNITO_USER_POOL_ID").ok_or(ConfigError::Missing("COGNITO_USER_POOL_ID"))?;

        let region = lookup("COGNITO_REGION")
            .or_else(|| lookup("AWS_REGION"))
            .unwrap_or_else(|| "us-east-1".to_string());

        let client_id =
            lookup("COGNITO_CLIENT_ID").ok_or(ConfigError::Missing("COGNITO_CLIENT_ID"))?;

        let client_secret = lookup("COGNITO_CLIENT_SECRET").filter(|s| !s.is_empty());

        // Session secret (minimum 32 bytes)
        let session_secret = lookup("SESSION_SECRET").ok_or(ConfigError::Missing("SESSION_SECRET"))?;

        if session_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "SESSION_SECRET must be at least 32 characters",
            ));
        }

        let session_duration_hours: u64 = parse_or(&lookup, "SESSION_DURATION_HOURS", 24)?;
        let retry_budget: u32 = parse_or(&lookup, "CHALLENGE_RETRY_BUDGET", 3)?;
        let flow_ttl_secs: u64 = parse_or(&lookup, "FLOW_TTL_SECS", 300)?;
        let request_timeout_secs: u64 = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30)?;
        let purge_interval_secs: u64 = parse_or(&lookup, "PURGE_INTERVAL_SECS", 60)?;
        let rate_limit_per_minute: u32 = parse_or(&lookup, "RATE_LIMIT_PER_MINUTE", 30)?;

        if rate_limit_per_minute == 0 {
            return Err(ConfigError::Invalid("RATE_LIMIT_PER_MINUTE"));
        }
        if purge_interval_secs == 0 {
            return Err(ConfigError::Invalid("PURGE_INTERVAL_SECS"));
        }

        // Metrics
        let metrics_enabled = lookup("METRICS_ENABLED")
            .and_then(|v| v.parse().ok())
            .unwrap_or(true);

        let session_duration_secs = session_duration_hours
            .checked_mul(3600)
            .ok_or(ConfigError::Invalid("SESSION_DURATION_HOURS"))?;

        let mut gateway = GatewayConfig::try_new(&pool_id, &region, &client_id, &session_secret)
            .map_err(|e| ConfigError::Core(e.to_string()))?
            .with_session_max_duration(Duration::from_secs(session_duration_secs))
            .with_challenge_retry_budget(retry_budget)
            .with_flow_ttl(Duration::from_secs(flow_ttl_secs));

        if let Some(secret) = client_secret {
            gateway = gateway.with_client_secret(secret);
        }

        gateway
            .validate()
            .map_err(|e| ConfigError::Core(e.to_string()))?;

        Ok(Self {
            http_port,
            gateway,
            request_timeout: Duration::from_secs(request_timeout_secs),
            purge_interval: Duration::from_secs(purge_interval_secs),
            rate_limit_per_minute,
            metrics_enabled,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Gateway config error: {0}")]
    Core(String),
}
