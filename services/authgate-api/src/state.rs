//! Application state

use std::num::NonZeroU32;
use std::sync::Arc;

use authgate_core::{CognitoProvider, Gateway, InMemorySessionStore};

use crate::config::Config;
use crate::rate_limit::IpRateLimiter;

/// Type alias for the gateway with its concrete provider and store
pub type GatewayImpl = Gateway<CognitoProvider, InMemorySessionStore>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Gateway for flows, sessions and token validation
    pub gateway: Arc<GatewayImpl>,
    /// Per-IP limiter for credential-bearing routes
    pub limiter: Arc<IpRateLimiter>,
    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state
    pub fn new(gateway: GatewayImpl, config: Config) -> Self {
        let per_minute =
            NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            gateway: Arc::new(gateway),
            limiter: Arc::new(IpRateLimiter::per_minute(per_minute)),
            config: Arc::new(config),
        }
    }

    /// Get request timeout from config
    pub fn request_timeout(&self) -> std::time::Duration {
        self.config.request_timeout
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
