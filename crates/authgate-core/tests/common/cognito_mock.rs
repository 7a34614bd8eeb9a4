//! Mock user pool API for integration testing
//!
//! Every user pool operation is a POST to the same endpoint, selected by the
//! `X-Amz-Target` header; the JWKS document is a plain GET.

use authgate_core::GatewayConfig;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockGuard, MockServer, ResponseTemplate};

use super::keys::{jwks_json, TEST_KEY_ID};
use super::test_config;

const JWKS_PATH: &str = "/.well-known/jwks.json";

pub struct CognitoMockServer {
    server: MockServer,
}

#[allow(dead_code)]
impl CognitoMockServer {
    /// Start a mock serving the test JWKS
    pub async fn start() -> Self {
        let mock = Self::start_bare().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[TEST_KEY_ID])))
            .mount(&mock.server)
            .await;
        mock
    }

    /// Start a mock with nothing mounted
    pub async fn start_bare() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn server(&self) -> &MockServer {
        &self.server
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Gateway config pointed at this server
    pub fn config(&self) -> GatewayConfig {
        test_config()
            .with_provider_endpoint_override(format!("{}/", self.server.uri()))
            .with_jwks_url_override(self.jwks_url())
    }

    /// Answer `operation` with `status` and a JSON body
    pub async fn on(&self, operation: &str, status: u16, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(header(
                "X-Amz-Target",
                format!("AWSCognitoIdentityProviderService.{operation}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Answer `operation` with a user pool error
    pub async fn on_error(&self, operation: &str, status: u16, error_type: &str) {
        self.on(
            operation,
            status,
            serde_json::json!({
                "__type": error_type,
                "message": "mock error"
            }),
        )
        .await;
    }

    /// Expect exactly `calls` requests for `operation`
    pub async fn expect(
        &self,
        operation: &str,
        calls: u64,
        status: u16,
        body: serde_json::Value,
    ) -> MockGuard {
        Mock::given(method("POST"))
            .and(header(
                "X-Amz-Target",
                format!("AWSCognitoIdentityProviderService.{operation}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(calls)
            .mount_as_scoped(&self.server)
            .await
    }

    /// Serve the JWKS endpoint with `status` and no body
    pub async fn jwks_error(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Expect exactly `calls` JWKS fetches
    pub async fn expect_jwks_calls(&self, calls: u64) -> MockGuard {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[TEST_KEY_ID])))
            .expect(calls)
            .mount_as_scoped(&self.server)
            .await
    }
}
