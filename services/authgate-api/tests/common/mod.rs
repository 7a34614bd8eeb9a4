//! Common test utilities for authgate-api HTTP tests

#[path = "../../../../crates/authgate-core/tests/common/keys.rs"]
#[allow(dead_code)]
pub mod keys;

use std::net::SocketAddr;
use std::time::Duration;

use authgate_api::build_router;
use authgate_api::config::Config;
use authgate_api::state::AppState;
use authgate_core::{CognitoProvider, Gateway, GatewayConfig, InMemorySessionStore, RetryConfig};
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keys::{jwks_json, TestClaims, TestKeyPair, TEST_KEY_ID};

pub const TEST_CLIENT_ID: &str = "test-client-id";
const TEST_POOL_ID: &str = "us-east-1_TESTPOOL";
const TEST_SESSION_SECRET: &str = "test-session-secret-at-least-32-bytes-long";
const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Response as seen by a test
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn error_code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }

    pub fn session_handle(&self) -> String {
        self.body["session"]["handle"]
            .as_str()
            .expect("response carries a session")
            .to_string()
    }

    pub fn set_cookie(&self) -> Option<&str> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Router wired to a mock user pool
pub struct TestApp {
    pub router: Router,
    pub mock: MockServer,
}

#[allow(dead_code)]
impl TestApp {
    /// Start with the JWKS endpoint serving the test key
    pub async fn start() -> Self {
        Self::start_with(1000, true).await
    }

    /// Start with a custom per-minute limit, optionally without a JWKS endpoint
    pub async fn start_with(rate_limit_per_minute: u32, serve_jwks: bool) -> Self {
        let mock = MockServer::start().await;
        if serve_jwks {
            Mock::given(method("GET"))
                .and(path(JWKS_PATH))
                .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&[TEST_KEY_ID])))
                .mount(&mock)
                .await;
        }

        let gateway_config = GatewayConfig::new(
            TEST_POOL_ID,
            "us-east-1",
            TEST_CLIENT_ID,
            TEST_SESSION_SECRET,
        )
        .with_retry(
            RetryConfig::new()
                .with_max_attempts(1)
                .with_base_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
        .with_provider_timeout(Duration::from_secs(2))
        .with_provider_endpoint_override(format!("{}/", mock.uri()))
        .with_jwks_url_override(format!("{}{}", mock.uri(), JWKS_PATH));

        let config = Config {
            http_port: 0,
            gateway: gateway_config.clone(),
            request_timeout: Duration::from_secs(5),
            purge_interval: Duration::from_secs(60),
            rate_limit_per_minute,
            metrics_enabled: false,
        };

        let gateway = Gateway::new(
            gateway_config.clone(),
            std::sync::Arc::new(CognitoProvider::new(&gateway_config)),
            std::sync::Arc::new(InMemorySessionStore::new()),
        )
        .expect("test config is valid");

        let router = build_router(AppState::new(gateway, config), None)
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

        Self { router, mock }
    }

    pub fn issuer(&self) -> String {
        format!("https://cognito-idp.us-east-1.amazonaws.com/{TEST_POOL_ID}")
    }

    /// Access token for `username` signed with the published key
    pub fn access_token(&self, username: &str) -> String {
        let claims =
            TestClaims::valid(&self.issuer(), TEST_CLIENT_ID, Utc::now()).with_username(username);
        TestKeyPair::load().sign(&claims)
    }

    /// Answer a user pool operation with `status` and a JSON body
    pub async fn on(&self, operation: &str, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(header_matcher(
                "X-Amz-Target",
                format!("AWSCognitoIdentityProviderService.{operation}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.mock)
            .await;
    }

    /// Answer a user pool operation with an error type
    pub async fn on_error(&self, operation: &str, status: u16, error_type: &str) {
        self.on(
            operation,
            status,
            json!({ "__type": error_type, "message": "mock error" }),
        )
        .await;
    }

    /// Sign-in answers with tokens for `username`
    pub async fn accept_sign_in(&self, username: &str) {
        let token = self.access_token(username);
        self.on("InitiateAuth", 200, authentication_result(&token))
            .await;
    }

    /// Sign in and return the session handle
    pub async fn signed_in(&self, username: &str) -> String {
        self.accept_sign_in(username).await;
        let response = self
            .post(
                "/api/v1/auth/sign-in",
                json!({ "username": username, "password": "correct-horse" }),
            )
            .await;
        assert_eq!(response.status, StatusCode::OK, "sign-in failed: {}", response.body);
        response.session_handle()
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None, None).await
    }

    pub async fn get_with_handle(&self, uri: &str, handle: &str) -> TestResponse {
        self.send(Method::GET, uri, Some(handle), None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, None, Some(body)).await
    }

    pub async fn post_with_handle(&self, uri: &str, handle: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(handle), Some(body)).await
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        handle: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(handle) = handle {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {handle}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        self.send_request(request).await
    }

    pub async fn send_request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

        TestResponse {
            status,
            headers,
            body,
        }
    }
}

pub fn authentication_result(access_token: &str) -> Value {
    json!({
        "AuthenticationResult": {
            "AccessToken": access_token,
            "RefreshToken": "refresh-token-value",
            "ExpiresIn": 3600,
            "TokenType": "Bearer"
        },
        "ChallengeParameters": {}
    })
}
