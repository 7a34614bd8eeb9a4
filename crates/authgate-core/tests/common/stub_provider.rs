//! In-process identity provider for testing
//!
//! Accepts one password and one challenge code, mints real RS256 tokens with
//! the test keypair and counts every call so tests can assert how often the
//! gateway reached the provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authgate_core::{
    ChallengeAnswer, ChallengeContext, ChallengeKind, Clock, CodeDelivery, Credentials,
    GatewayConfig, IdentityProvider, IssuedChallenge, KeySet, ManualClock, ProviderError,
    ProviderResult, RefreshGrant, SignUpOutcome, SignUpRequest, TerminalKind, TokenSet,
};

use super::keys::{test_jwk, TestClaims, TestKeyPair, TEST_KEY_ID};

pub const TEST_PASSWORD: &str = "correct-horse-battery";
pub const TEST_CODE: &str = "123456";

/// Call counters
#[derive(Debug, Default)]
pub struct CallCounts {
    pub initiate: AtomicUsize,
    pub respond: AtomicUsize,
    pub key_fetches: AtomicUsize,
    pub refresh: AtomicUsize,
    pub sign_up: AtomicUsize,
    pub confirm_sign_up: AtomicUsize,
    pub forgot_password: AtomicUsize,
    pub confirm_forgot_password: AtomicUsize,
    pub change_password: AtomicUsize,
}

/// Scriptable provider backed by the test keypair
pub struct StubProvider {
    keys: TestKeyPair,
    clock: Arc<ManualClock>,
    issuer: String,
    client_id: String,
    mfa: Mutex<Option<ChallengeKind>>,
    published_kids: Mutex<Vec<String>>,
    key_fetch_delay: Mutex<Duration>,
    /// Latency added to challenge responses and refreshes
    call_delay: Mutex<Duration>,
    token_lifetime_secs: AtomicI64,
    /// Remaining calls that fail transiently before the provider recovers
    transient_failures: AtomicUsize,
    pub calls: CallCounts,
}

#[allow(dead_code)]
impl StubProvider {
    pub fn new(config: &GatewayConfig, clock: Arc<ManualClock>) -> Self {
        Self {
            keys: TestKeyPair::load(),
            clock,
            issuer: config.cognito_issuer(),
            client_id: config.cognito_client_id.clone(),
            mfa: Mutex::new(None),
            published_kids: Mutex::new(vec![TEST_KEY_ID.to_string()]),
            key_fetch_delay: Mutex::new(Duration::ZERO),
            call_delay: Mutex::new(Duration::ZERO),
            token_lifetime_secs: AtomicI64::new(3600),
            transient_failures: AtomicUsize::new(0),
            calls: CallCounts::default(),
        }
    }

    /// Require `kind` after a correct password
    pub fn with_mfa(self, kind: ChallengeKind) -> Self {
        *self.mfa.lock().unwrap() = Some(kind);
        self
    }

    pub fn with_key_fetch_delay(self, delay: Duration) -> Self {
        *self.key_fetch_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_call_delay(self, delay: Duration) -> Self {
        *self.call_delay.lock().unwrap() = delay;
        self
    }

    pub fn with_token_lifetime(self, seconds: i64) -> Self {
        self.token_lifetime_secs.store(seconds, Ordering::SeqCst);
        self
    }

    /// Replace the key ids served by the JWKS endpoint
    pub fn publish_kids(&self, kids: &[&str]) {
        *self.published_kids.lock().unwrap() = kids.iter().map(|k| k.to_string()).collect();
    }

    /// Fail the next `count` provider calls with a transient error
    pub fn fail_next(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn key_fetches(&self) -> usize {
        self.calls.key_fetches.load(Ordering::SeqCst)
    }

    pub fn initiate_calls(&self) -> usize {
        self.calls.initiate.load(Ordering::SeqCst)
    }

    pub fn respond_calls(&self) -> usize {
        self.calls.respond.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls.refresh.load(Ordering::SeqCst)
    }

    /// Stable subject for a username
    pub fn subject_for(username: &str) -> String {
        format!("sub-{username}")
    }

    /// Signed access token for `username`, as the provider would issue it
    pub fn access_token_for(&self, username: &str) -> String {
        let claims = TestClaims::valid(&self.issuer, &self.client_id, self.clock.now())
            .with_username(username)
            .with_sub(&Self::subject_for(username))
            .with_lifetime(self.token_lifetime_secs.load(Ordering::SeqCst));
        self.keys.sign(&claims)
    }

    fn mint(&self, username: &str) -> TokenSet {
        TokenSet {
            access_token: self.access_token_for(username),
            id_token: None,
            refresh_token: Some(format!("refresh-{username}")),
            expires_in: self.token_lifetime_secs.load(Ordering::SeqCst).max(0) as u64,
            token_type: "Bearer".to_string(),
        }
    }

    async fn pause(&self) {
        let delay = *self.call_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn code_mismatch() -> ProviderError {
        ProviderError::terminal(TerminalKind::InvalidChallengeResponse, "CodeMismatchException")
    }

    fn not_authorized() -> ProviderError {
        ProviderError::terminal(TerminalKind::InvalidCredentials, "NotAuthorizedException")
    }

    fn unavailable() -> ProviderError {
        ProviderError::Transient("ServiceUnavailable".to_string())
    }
}

#[async_trait]
impl IdentityProvider for StubProvider {
    async fn initiate_auth(&self, credentials: &Credentials) -> ProviderResult {
        self.calls.initiate.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return Self::unavailable().into();
        }
        if credentials.password != TEST_PASSWORD {
            return Self::not_authorized().into();
        }

        let mfa = self.mfa.lock().unwrap().clone();
        match mfa {
            Some(kind) => ProviderResult::ChallengeIssued(IssuedChallenge {
                kind,
                metadata: HashMap::from([(
                    "destination".to_string(),
                    "+*******1234".to_string(),
                )]),
                session: Some(format!("session-{}", credentials.username)),
            }),
            None => ProviderResult::Success(self.mint(&credentials.username)),
        }
    }

    async fn respond_to_challenge(
        &self,
        context: &ChallengeContext,
        answer: &ChallengeAnswer,
    ) -> ProviderResult {
        self.calls.respond.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.take_transient_failure() {
            return Self::unavailable().into();
        }
        if context.session.as_deref() != Some(format!("session-{}", context.username).as_str()) {
            return ProviderError::terminal(TerminalKind::Rejected, "InvalidSession").into();
        }
        match answer {
            ChallengeAnswer::Code { code } if code == TEST_CODE => {
                ProviderResult::Success(self.mint(&context.username))
            }
            _ => Self::code_mismatch().into(),
        }
    }

    async fn fetch_signing_keys(&self) -> Result<KeySet, ProviderError> {
        self.calls.key_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.key_fetch_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let kids = self.published_kids.lock().unwrap().clone();
        Ok(KeySet {
            keys: kids.iter().map(|kid| test_jwk(kid)).collect(),
        })
    }

    async fn refresh_token(&self, grant: &RefreshGrant) -> Result<TokenSet, ProviderError> {
        self.calls.refresh.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.take_transient_failure() {
            return Err(Self::unavailable());
        }
        if grant.refresh_token != format!("refresh-{}", grant.username) {
            return Err(Self::not_authorized());
        }
        Ok(self.mint(&grant.username))
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, ProviderError> {
        self.calls.sign_up.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return Err(Self::unavailable());
        }
        Ok(SignUpOutcome {
            user_sub: Self::subject_for(&request.email),
            confirmed: false,
            delivery: Some(CodeDelivery {
                destination: Some("a***@e***".to_string()),
                medium: Some("EMAIL".to_string()),
                attribute: Some("email".to_string()),
            }),
        })
    }

    async fn confirm_sign_up(&self, _username: &str, code: &str) -> Result<(), ProviderError> {
        self.calls.confirm_sign_up.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return Err(Self::unavailable());
        }
        if code == TEST_CODE {
            Ok(())
        } else {
            Err(Self::code_mismatch())
        }
    }

    async fn forgot_password(&self, _username: &str) -> Result<CodeDelivery, ProviderError> {
        self.calls.forgot_password.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return Err(Self::unavailable());
        }
        Ok(CodeDelivery {
            destination: Some("a***@e***".to_string()),
            medium: Some("EMAIL".to_string()),
            attribute: Some("email".to_string()),
        })
    }

    async fn confirm_forgot_password(
        &self,
        _username: &str,
        code: &str,
        _new_password: &str,
    ) -> Result<(), ProviderError> {
        self.calls.confirm_forgot_password.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return Err(Self::unavailable());
        }
        if code == TEST_CODE {
            Ok(())
        } else {
            Err(Self::code_mismatch())
        }
    }

    async fn change_password(
        &self,
        _access_token: &str,
        previous_password: &str,
        _proposed_password: &str,
    ) -> Result<(), ProviderError> {
        self.calls.change_password.fetch_add(1, Ordering::SeqCst);
        if self.take_transient_failure() {
            return Err(Self::unavailable());
        }
        if previous_password == TEST_PASSWORD {
            Ok(())
        } else {
            Err(Self::not_authorized())
        }
    }
}
