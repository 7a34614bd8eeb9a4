//! Credential flow orchestration
//!
//! Each flow is an explicit state machine keyed by [`FlowId`]:
//!
//! ```text
//! INITIATED ──▶ CHALLENGE_ISSUED ──▶ CONFIRMED ──▶ COMPLETED
//!     │              │  ▲  (wrong answer, budget left)
//!     │              └──┘
//!     └────────────────┴──────────────▶ FAILED
//! ```
//!
//! Requests for the same flow are serialized by a per-flow lock; different
//! flows never contend. Provider calls run on a spawned task so a client
//! disconnect cannot abort them half way, and their result is discarded if
//! the flow expired while the call was in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use authgate_types::{ChallengeKind, FlowId, FlowKind, FlowStage};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::{saturating_add, Clock};
use crate::config::GatewayConfig;
use crate::crypto::constant_time_str_eq;
use crate::error::GatewayError;
use crate::provider::{
    AuthProgress, ChallengeAnswer, ChallengeContext, Credentials, IdentityProvider, ProviderError,
    SignUpRequest, TerminalKind, TokenSet,
};
use crate::retry::{with_retry_and_timeout, RetryConfig};
use crate::session::{SessionGrant, SessionManager, SessionStore};
use crate::token::TokenValidator;

/// Result of a flow step
#[derive(Debug, Clone, PartialEq)]
pub enum FlowOutcome {
    /// The flow waits for an answer
    Challenge {
        flow_id: FlowId,
        kind: FlowKind,
        challenge: ChallengeKind,
        /// Non-secret hints such as the code delivery destination
        metadata: HashMap<String, String>,
    },
    /// The flow finished; sign-in flows carry the new session
    Completed {
        flow_id: FlowId,
        kind: FlowKind,
        session: Option<SessionGrant>,
    },
}

impl FlowOutcome {
    pub fn flow_id(&self) -> FlowId {
        match self {
            Self::Challenge { flow_id, .. } | Self::Completed { flow_id, .. } => *flow_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Read-only view of a flow
#[derive(Debug, Clone, Serialize)]
pub struct FlowSnapshot {
    pub id: FlowId,
    pub kind: FlowKind,
    pub stage: FlowStage,
    pub username: String,
    pub challenge: Option<ChallengeKind>,
    pub metadata: HashMap<String, String>,
    /// Consecutive invalid answers to the current challenge
    pub failed_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingChallenge {
    kind: ChallengeKind,
    metadata: HashMap<String, String>,
    /// Provider session carried into the next call
    session: Option<String>,
}

/// Stored result of a terminal flow, replayed for identical requests
#[derive(Debug, Clone)]
struct TerminalRecord {
    fingerprint: Option<String>,
    result: Result<FlowOutcome, GatewayError>,
}

#[derive(Debug)]
struct FlowState {
    id: FlowId,
    kind: FlowKind,
    stage: FlowStage,
    username: String,
    challenge: Option<PendingChallenge>,
    failed_attempts: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    terminal: Option<TerminalRecord>,
}

impl FlowState {
    fn new(kind: FlowKind, username: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: FlowId::new(),
            kind,
            stage: FlowStage::Initiated,
            username: username.to_string(),
            challenge: None,
            failed_attempts: 0,
            created_at: now,
            updated_at: now,
            expires_at: saturating_add(now, ttl),
            terminal: None,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.stage.is_terminal() && now >= self.expires_at
    }

    fn advance(&mut self, next: FlowStage, now: DateTime<Utc>) -> Result<(), GatewayError> {
        if !self.stage.can_transition_to(next) {
            tracing::error!(flow_id = %self.id, from = ?self.stage, to = ?next, "Illegal flow transition");
            return Err(GatewayError::Internal("illegal flow transition".to_string()));
        }
        self.stage = next;
        self.updated_at = now;
        Ok(())
    }

    /// Whether the purge task may drop this flow
    fn purgeable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        if self.stage.is_terminal() {
            now >= saturating_add(self.updated_at, retention)
        } else {
            now >= self.expires_at
        }
    }

    fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            id: self.id,
            kind: self.kind,
            stage: self.stage,
            username: self.username.clone(),
            challenge: self.challenge.as_ref().map(|c| c.kind.clone()),
            metadata: self
                .challenge
                .as_ref()
                .map(|c| c.metadata.clone())
                .unwrap_or_default(),
            failed_attempts: self.failed_attempts,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        }
    }
}

/// What a provider call achieved for a challenged flow
enum Step {
    Progress(AuthProgress),
    /// A confirmation code was accepted; nothing else to hand out
    Confirmed,
}

#[derive(Debug, Clone)]
struct FlowPolicy {
    ttl: Duration,
    retention: Duration,
    retry_budget: u32,
    retry: RetryConfig,
    provider_timeout: Duration,
}

struct FlowInner<P: IdentityProvider, S: SessionStore> {
    provider: Arc<P>,
    validator: Arc<TokenValidator<P>>,
    sessions: Arc<SessionManager<S>>,
    clock: Arc<dyn Clock>,
    policy: FlowPolicy,
    flows: DashMap<FlowId, Arc<Mutex<FlowState>>>,
}

/// Drives sign-in, sign-up and password reset flows
pub struct FlowOrchestrator<P: IdentityProvider, S: SessionStore> {
    inner: Arc<FlowInner<P, S>>,
}

impl<P: IdentityProvider, S: SessionStore> Clone for FlowOrchestrator<P, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: IdentityProvider, S: SessionStore> FlowOrchestrator<P, S> {
    pub fn new(
        config: &GatewayConfig,
        provider: Arc<P>,
        validator: Arc<TokenValidator<P>>,
        sessions: Arc<SessionManager<S>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(FlowInner {
                provider,
                validator,
                sessions,
                clock,
                policy: FlowPolicy {
                    ttl: config.flow_ttl,
                    retention: config.flow_retention,
                    retry_budget: config.challenge_retry_budget,
                    retry: config.retry.clone(),
                    provider_timeout: config.provider_timeout,
                },
                flows: DashMap::new(),
            }),
        }
    }

    // =========================================================================
    // Flow entry points
    // =========================================================================

    /// Start a sign-in with username and password
    pub async fn start_sign_in(&self, credentials: Credentials) -> Result<FlowOutcome, GatewayError> {
        let flow = self.register(FlowKind::SignIn, &credentials.username);
        let this = self.clone();
        self.detach(async move { this.initiate_sign_in(flow, credentials).await })
            .await
    }

    /// Register a new user; unconfirmed users get an email verification challenge
    pub async fn start_sign_up(&self, request: SignUpRequest) -> Result<FlowOutcome, GatewayError> {
        let flow = self.register(FlowKind::SignUp, &request.email);
        let this = self.clone();
        self.detach(async move { this.initiate_sign_up(flow, request).await })
            .await
    }

    /// Send a password reset code
    pub async fn start_password_reset(&self, username: String) -> Result<FlowOutcome, GatewayError> {
        let flow = self.register(FlowKind::PasswordReset, &username);
        let this = self.clone();
        self.detach(async move { this.initiate_password_reset(flow, username).await })
            .await
    }

    /// Answer the pending challenge of a flow
    ///
    /// Replaying the answer that finished a flow returns the stored result
    /// without calling the provider again.
    pub async fn respond(
        &self,
        flow_id: FlowId,
        answer: ChallengeAnswer,
    ) -> Result<FlowOutcome, GatewayError> {
        let flow = self
            .inner
            .flows
            .get(&flow_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                tracing::debug!(%flow_id, "Unknown or purged flow");
                GatewayError::FlowExpired
            })?;
        let this = self.clone();
        self.detach(async move { this.answer_challenge(flow, answer).await })
            .await
    }

    /// Current state of a flow
    pub async fn snapshot(&self, flow_id: FlowId) -> Option<FlowSnapshot> {
        let flow = self
            .inner
            .flows
            .get(&flow_id)
            .map(|entry| Arc::clone(entry.value()))?;
        let state = flow.lock().await;
        Some(state.snapshot())
    }

    /// Drop expired flows and terminal flows past the retention window
    ///
    /// Flows busy with a request are skipped and picked up on the next run.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let retention = self.inner.policy.retention;
        let mut purged = 0;
        self.inner.flows.retain(|_, flow| match flow.try_lock() {
            Ok(state) if state.purgeable(now, retention) => {
                purged += 1;
                false
            }
            _ => true,
        });
        if purged > 0 {
            tracing::debug!(purged, "Purged flows");
        }
        purged
    }

    /// Number of tracked flows
    pub fn len(&self) -> usize {
        self.inner.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.flows.is_empty()
    }

    // =========================================================================
    // Flow steps
    // =========================================================================

    async fn initiate_sign_in(
        &self,
        flow: Arc<Mutex<FlowState>>,
        credentials: Credentials,
    ) -> Result<FlowOutcome, GatewayError> {
        let mut state = flow.lock().await;
        let provider: &P = &self.inner.provider;
        let creds = &credentials;
        let result = self
            .call_provider(move || async move { provider.initiate_auth(creds).await.into_result() })
            .await;

        if state.is_expired(self.now()) {
            return self.discard_expired(&mut state, None);
        }

        match result {
            Ok(AuthProgress::Tokens(tokens)) => self.complete_sign_in(&mut state, tokens, None).await,
            Ok(AuthProgress::Challenge(challenge)) => self.issue_challenge(
                &mut state,
                challenge.kind,
                challenge.metadata,
                challenge.session,
            ),
            Err(e) => self.fail(&mut state, e.into(), None),
        }
    }

    async fn initiate_sign_up(
        &self,
        flow: Arc<Mutex<FlowState>>,
        request: SignUpRequest,
    ) -> Result<FlowOutcome, GatewayError> {
        let mut state = flow.lock().await;
        let provider: &P = &self.inner.provider;
        let req = &request;
        let result = self.call_provider(move || provider.sign_up(req)).await;

        if state.is_expired(self.now()) {
            return self.discard_expired(&mut state, None);
        }

        match result {
            Ok(outcome) if outcome.confirmed => {
                tracing::debug!(flow_id = %state.id, "User confirmed on registration");
                self.complete(&mut state, None, None)
            }
            Ok(outcome) => {
                let metadata = outcome
                    .delivery
                    .map(|delivery| delivery.to_metadata())
                    .unwrap_or_default();
                self.issue_challenge(&mut state, ChallengeKind::EmailVerification, metadata, None)
            }
            Err(e) => self.fail(&mut state, e.into(), None),
        }
    }

    async fn initiate_password_reset(
        &self,
        flow: Arc<Mutex<FlowState>>,
        username: String,
    ) -> Result<FlowOutcome, GatewayError> {
        let mut state = flow.lock().await;
        let provider: &P = &self.inner.provider;
        let name = username.as_str();
        let result = self.call_provider(move || provider.forgot_password(name)).await;

        if state.is_expired(self.now()) {
            return self.discard_expired(&mut state, None);
        }

        match result {
            Ok(delivery) => self.issue_challenge(
                &mut state,
                ChallengeKind::PasswordResetCode,
                delivery.to_metadata(),
                None,
            ),
            Err(e) => self.fail(&mut state, e.into(), None),
        }
    }

    async fn answer_challenge(
        &self,
        flow: Arc<Mutex<FlowState>>,
        answer: ChallengeAnswer,
    ) -> Result<FlowOutcome, GatewayError> {
        let mut state = flow.lock().await;
        let fingerprint = answer.fingerprint();

        if let Some(record) = &state.terminal {
            return match &record.fingerprint {
                Some(stored) if constant_time_str_eq(stored, &fingerprint) => {
                    tracing::debug!(flow_id = %state.id, "Replaying stored flow result");
                    record.result.clone()
                }
                _ => Err(GatewayError::FlowAlreadyTerminal),
            };
        }

        if state.is_expired(self.now()) {
            return self.discard_expired(&mut state, Some(fingerprint));
        }

        let challenge = match (state.stage, &state.challenge) {
            (FlowStage::ChallengeIssued, Some(challenge)) => challenge.clone(),
            _ => return Err(GatewayError::ChallengeRequired),
        };
        if !answer.fits(&challenge.kind) {
            tracing::debug!(flow_id = %state.id, challenge = %challenge.kind, "Answer does not fit pending challenge");
            return Err(GatewayError::ChallengeRequired);
        }

        let result = self.submit(&state, &challenge, &answer).await;

        if state.is_expired(self.now()) {
            return self.discard_expired(&mut state, Some(fingerprint));
        }

        match result {
            Ok(Step::Progress(AuthProgress::Tokens(tokens))) => {
                state.advance(FlowStage::Confirmed, self.now())?;
                self.complete_sign_in(&mut state, tokens, Some(fingerprint))
                    .await
            }
            Ok(Step::Progress(AuthProgress::Challenge(next))) => {
                state.failed_attempts = 0;
                self.issue_challenge(&mut state, next.kind, next.metadata, next.session)
            }
            Ok(Step::Confirmed) => {
                state.advance(FlowStage::Confirmed, self.now())?;
                self.complete(&mut state, None, Some(fingerprint))
            }
            Err(e) if e.is_invalid_challenge_response() => self.reject_answer(&mut state, fingerprint),
            // The flow stays where it was and the client may try again
            Err(e @ ProviderError::Transient(_)) => Err(e.into()),
            Err(e) => self.fail(&mut state, e.into(), Some(fingerprint)),
        }
    }

    /// Send a challenge answer to the provider
    async fn submit(
        &self,
        state: &FlowState,
        challenge: &PendingChallenge,
        answer: &ChallengeAnswer,
    ) -> Result<Step, ProviderError> {
        let provider: &P = &self.inner.provider;
        let username = state.username.as_str();

        match (state.kind, answer) {
            (FlowKind::SignIn, _) => {
                let context = ChallengeContext {
                    flow_id: state.id,
                    username: state.username.clone(),
                    kind: challenge.kind.clone(),
                    session: challenge.session.clone(),
                };
                let ctx = &context;
                self.call_provider(move || async move {
                    provider.respond_to_challenge(ctx, answer).await.into_result()
                })
                .await
                .map(Step::Progress)
            }
            (FlowKind::SignUp, ChallengeAnswer::Code { code }) => {
                let code = code.as_str();
                self.call_provider(move || provider.confirm_sign_up(username, code))
                    .await
                    .map(|()| Step::Confirmed)
            }
            (FlowKind::PasswordReset, ChallengeAnswer::CodeAndPassword { code, new_password }) => {
                let (code, new_password) = (code.as_str(), new_password.as_str());
                self.call_provider(move || {
                    provider.confirm_forgot_password(username, code, new_password)
                })
                .await
                .map(|()| Step::Confirmed)
            }
            _ => Err(ProviderError::terminal(TerminalKind::Rejected, "AnswerShapeMismatch")),
        }
    }

    /// Validate provider tokens and issue the session
    async fn complete_sign_in(
        &self,
        state: &mut FlowState,
        tokens: TokenSet,
        fingerprint: Option<String>,
    ) -> Result<FlowOutcome, GatewayError> {
        let validated = match self.inner.validator.validate(&tokens.access_token).await {
            Ok(validated) => validated,
            Err(e) => {
                tracing::warn!(flow_id = %state.id, error = %e, "Provider token failed validation");
                return self.fail(state, e.into(), fingerprint);
            }
        };

        match self.inner.sessions.issue(&validated, tokens).await {
            Ok(grant) => self.complete(state, Some(grant), fingerprint),
            Err(e) => self.fail(state, e, fingerprint),
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    fn issue_challenge(
        &self,
        state: &mut FlowState,
        kind: ChallengeKind,
        metadata: HashMap<String, String>,
        session: Option<String>,
    ) -> Result<FlowOutcome, GatewayError> {
        state.advance(FlowStage::ChallengeIssued, self.now())?;
        tracing::info!(flow_id = %state.id, flow = %state.kind, challenge = %kind, "Challenge issued");
        state.challenge = Some(PendingChallenge {
            kind: kind.clone(),
            metadata: metadata.clone(),
            session,
        });
        Ok(FlowOutcome::Challenge {
            flow_id: state.id,
            kind: state.kind,
            challenge: kind,
            metadata,
        })
    }

    fn reject_answer(
        &self,
        state: &mut FlowState,
        fingerprint: String,
    ) -> Result<FlowOutcome, GatewayError> {
        state.failed_attempts += 1;
        state.updated_at = self.now();

        let budget = self.inner.policy.retry_budget;
        if state.failed_attempts >= budget {
            tracing::warn!(flow_id = %state.id, attempts = state.failed_attempts, "Challenge retry budget exhausted");
            return self.fail(state, GatewayError::RetryBudgetExhausted, Some(fingerprint));
        }

        tracing::debug!(
            flow_id = %state.id,
            attempts = state.failed_attempts,
            remaining = budget - state.failed_attempts,
            "Invalid challenge answer"
        );
        Err(GatewayError::InvalidCredentials)
    }

    fn complete(
        &self,
        state: &mut FlowState,
        session: Option<SessionGrant>,
        fingerprint: Option<String>,
    ) -> Result<FlowOutcome, GatewayError> {
        state.advance(FlowStage::Completed, self.now())?;
        state.challenge = None;

        let outcome = FlowOutcome::Completed {
            flow_id: state.id,
            kind: state.kind,
            session,
        };
        state.terminal = Some(TerminalRecord {
            fingerprint,
            result: Ok(outcome.clone()),
        });

        tracing::info!(flow_id = %state.id, flow = %state.kind, "Flow completed");
        record_flow(state.kind, "completed");
        Ok(outcome)
    }

    fn fail(
        &self,
        state: &mut FlowState,
        error: GatewayError,
        fingerprint: Option<String>,
    ) -> Result<FlowOutcome, GatewayError> {
        state.advance(FlowStage::Failed, self.now())?;
        state.challenge = None;
        state.terminal = Some(TerminalRecord {
            fingerprint,
            result: Err(error.clone()),
        });

        tracing::info!(flow_id = %state.id, flow = %state.kind, reason = error.error_code(), "Flow failed");
        record_flow(state.kind, error.error_code());
        Err(error)
    }

    fn discard_expired(
        &self,
        state: &mut FlowState,
        fingerprint: Option<String>,
    ) -> Result<FlowOutcome, GatewayError> {
        tracing::debug!(flow_id = %state.id, "Flow expired, discarding provider result");
        self.fail(state, GatewayError::FlowExpired, fingerprint)
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn register(&self, kind: FlowKind, username: &str) -> Arc<Mutex<FlowState>> {
        let state = FlowState::new(kind, username, self.now(), self.inner.policy.ttl);
        let id = state.id;
        let flow = Arc::new(Mutex::new(state));
        self.inner.flows.insert(id, Arc::clone(&flow));
        tracing::debug!(flow_id = %id, flow = %kind, "Flow initiated");
        flow
    }

    /// Run flow work on its own task so that dropping the caller's future
    /// does not abort an in-flight provider call
    async fn detach<F>(&self, work: F) -> Result<FlowOutcome, GatewayError>
    where
        F: Future<Output = Result<FlowOutcome, GatewayError>> + Send + 'static,
    {
        tokio::spawn(work).await.unwrap_or_else(|e| {
            tracing::error!("Flow task failed: {}", e);
            Err(GatewayError::Internal("flow task failed".to_string()))
        })
    }

    async fn call_provider<F, Fut, T>(&self, operation: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let policy = &self.inner.policy;
        with_retry_and_timeout(policy.retry.clone(), policy.provider_timeout, operation).await
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }
}

impl<P: IdentityProvider, S: SessionStore> std::fmt::Debug for FlowOrchestrator<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowOrchestrator")
            .field("flows", &self.inner.flows.len())
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

fn record_flow(kind: FlowKind, result: &'static str) {
    metrics::counter!("authgate_flows_total", "kind" => kind.as_str(), "result" => result)
        .increment(1);
}
