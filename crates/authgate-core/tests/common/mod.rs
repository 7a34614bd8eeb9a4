//! Common test utilities for authgate-core integration tests

pub mod cognito_mock;
pub mod keys;
pub mod stub_provider;

use std::sync::Arc;
use std::time::Duration;

use authgate_core::{Gateway, GatewayConfig, InMemorySessionStore, ManualClock, RetryConfig};

#[allow(unused_imports)]
pub use cognito_mock::CognitoMockServer;
#[allow(unused_imports)]
pub use keys::{splice_signature, test_jwk, TestClaims, TestKeyPair, TEST_KEY_ID};
#[allow(unused_imports)]
pub use stub_provider::{StubProvider, TEST_CODE, TEST_PASSWORD};

pub const TEST_POOL_ID: &str = "us-east-1_TESTPOOL";
pub const TEST_REGION: &str = "us-east-1";
pub const TEST_CLIENT_ID: &str = "test-client-id";
pub const TEST_SESSION_SECRET: &str = "test-session-secret-at-least-32-bytes-long";

/// Config with fast retries for tests
pub fn test_config() -> GatewayConfig {
    GatewayConfig::new(TEST_POOL_ID, TEST_REGION, TEST_CLIENT_ID, TEST_SESSION_SECRET)
        .with_retry(
            RetryConfig::new()
                .with_max_attempts(2)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
        .with_provider_timeout(Duration::from_secs(2))
}

/// Gateway wired to a stub provider on a manual clock
#[allow(dead_code)]
pub struct TestGateway {
    pub gateway: Gateway<StubProvider, InMemorySessionStore>,
    pub provider: Arc<StubProvider>,
    pub store: Arc<InMemorySessionStore>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
impl TestGateway {
    pub fn new() -> Self {
        Self::build(test_config(), |provider| provider)
    }

    /// Build with a custom config and provider setup
    pub fn build(
        config: GatewayConfig,
        setup: impl FnOnce(StubProvider) -> StubProvider,
    ) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let provider = Arc::new(setup(StubProvider::new(&config, Arc::clone(&clock))));
        let store = Arc::new(InMemorySessionStore::new());
        let gateway = Gateway::with_clock(
            config,
            Arc::clone(&provider),
            Arc::clone(&store),
            clock.clone(),
        )
        .expect("test config is valid");
        Self {
            gateway,
            provider,
            store,
            clock,
        }
    }
}
