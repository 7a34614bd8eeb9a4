//! Gateway service - ties together token validation, credential flows and sessions

use std::collections::HashMap;
use std::sync::Arc;

use authgate_types::{ChallengeKind, FlowId, SessionId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigValidationError, GatewayConfig};
use crate::crypto::HmacKeyError;
use crate::error::{GatewayError, TokenError};
use crate::flow::{FlowOrchestrator, FlowOutcome};
use crate::provider::{ChallengeAnswer, Credentials, IdentityProvider, RefreshGrant, SignUpRequest};
use crate::retry::with_retry_and_timeout;
use crate::session::{Session, SessionGrant, SessionManager, SessionStore};
use crate::token::{TokenValidator, ValidatedToken};

/// Normalized status of an auth operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthStatus {
    /// The operation finished
    Completed,
    /// A sign-in challenge (MFA, new password) must be answered
    ChallengeRequired,
    /// A confirmation code was sent and must be submitted
    ConfirmationRequired,
}

/// Challenge as exposed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeView {
    #[serde(rename = "type")]
    pub kind: ChallengeKind,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Response to every flow and session operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthResponse {
    pub status: AuthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<FlowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionGrant>,
}

impl AuthResponse {
    /// A completed operation carrying a session
    pub fn session(grant: SessionGrant) -> Self {
        Self {
            status: AuthStatus::Completed,
            flow_id: None,
            challenge: None,
            session: Some(grant),
        }
    }
}

impl From<FlowOutcome> for AuthResponse {
    fn from(outcome: FlowOutcome) -> Self {
        match outcome {
            FlowOutcome::Challenge {
                flow_id,
                challenge,
                metadata,
                ..
            } => {
                let status = match challenge {
                    ChallengeKind::EmailVerification | ChallengeKind::PasswordResetCode => {
                        AuthStatus::ConfirmationRequired
                    }
                    _ => AuthStatus::ChallengeRequired,
                };
                Self {
                    status,
                    flow_id: Some(flow_id),
                    challenge: Some(ChallengeView {
                        kind: challenge,
                        metadata,
                    }),
                    session: None,
                }
            }
            FlowOutcome::Completed {
                flow_id, session, ..
            } => Self {
                status: AuthStatus::Completed,
                flow_id: Some(flow_id),
                challenge: None,
                session,
            },
        }
    }
}

/// Session details safe to hand to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub subject: String,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id,
            subject: session.subject.clone(),
            username: session.username.clone(),
            issued_at: session.issued_at,
            expires_at: session.expires_at,
        }
    }
}

/// Counts from one purge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub flows: usize,
    pub sessions: usize,
}

/// Authentication gateway
///
/// Provides unified interface for:
/// - Credential flows (sign-in with challenges, sign-up, password reset)
/// - Session refresh, validation and revocation
/// - Token validation against the provider's signing keys
pub struct Gateway<P: IdentityProvider, S: SessionStore> {
    config: GatewayConfig,
    provider: Arc<P>,
    validator: Arc<TokenValidator<P>>,
    sessions: Arc<SessionManager<S>>,
    flows: FlowOrchestrator<P, S>,
}

impl<P: IdentityProvider, S: SessionStore> Gateway<P, S> {
    /// Create a gateway on the system clock
    pub fn new(
        config: GatewayConfig,
        provider: Arc<P>,
        store: Arc<S>,
    ) -> Result<Self, ConfigValidationError> {
        Self::with_clock(config, provider, store, Arc::new(SystemClock))
    }

    /// Create a gateway with an explicit time source
    pub fn with_clock(
        config: GatewayConfig,
        provider: Arc<P>,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigValidationError> {
        config.validate()?;

        let validator = Arc::new(TokenValidator::new(
            &config,
            Arc::clone(&provider),
            Arc::clone(&clock),
        ));
        let sessions = Arc::new(
            SessionManager::new(&config, store, Arc::clone(&clock)).map_err(|e| match e {
                HmacKeyError::KeyTooShort { actual, minimum } => {
                    ConfigValidationError::SessionSecretTooShort { actual, minimum }
                }
                HmacKeyError::InvalidKey => ConfigValidationError::Empty("session_secret"),
            })?,
        );
        let flows = FlowOrchestrator::new(
            &config,
            Arc::clone(&provider),
            Arc::clone(&validator),
            Arc::clone(&sessions),
            clock,
        );

        Ok(Self {
            config,
            provider,
            validator,
            sessions,
            flows,
        })
    }

    // =========================================================================
    // Credential flows
    // =========================================================================

    /// Start a sign-in
    pub async fn start_auth(&self, credentials: Credentials) -> Result<AuthResponse, GatewayError> {
        if credentials.username.trim().is_empty() || credentials.password.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "username and password are required".to_string(),
            ));
        }
        Ok(self.flows.start_sign_in(credentials).await?.into())
    }

    /// Answer the pending challenge of a flow
    pub async fn respond_to_challenge(
        &self,
        flow_id: FlowId,
        answer: ChallengeAnswer,
    ) -> Result<AuthResponse, GatewayError> {
        Ok(self.flows.respond(flow_id, answer).await?.into())
    }

    /// Register a new user
    pub async fn start_sign_up(&self, request: SignUpRequest) -> Result<AuthResponse, GatewayError> {
        if !request.email.contains('@') {
            return Err(GatewayError::InvalidRequest("a valid email is required".to_string()));
        }
        if request.password.is_empty() {
            return Err(GatewayError::InvalidRequest("password is required".to_string()));
        }
        Ok(self.flows.start_sign_up(request).await?.into())
    }

    /// Send a password reset code
    pub async fn start_password_reset(&self, username: &str) -> Result<AuthResponse, GatewayError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(GatewayError::InvalidRequest("username is required".to_string()));
        }
        Ok(self
            .flows
            .start_password_reset(username.to_string())
            .await?
            .into())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Exchange a session for a new one on refreshed provider tokens
    ///
    /// The old session is revoked once the new one is issued. Concurrent
    /// refreshes of one session are serialized; only the first succeeds and
    /// the rest see the session as revoked.
    pub async fn refresh_session(&self, handle: &str) -> Result<AuthResponse, GatewayError> {
        let id = self.sessions.verify_handle(handle)?;
        let guard = self.sessions.lock_rotation(id).await;
        let result = self.refresh_locked(handle).await;
        self.sessions.release_rotation(id, guard);
        result
    }

    async fn refresh_locked(&self, handle: &str) -> Result<AuthResponse, GatewayError> {
        let session = self.sessions.validate(handle).await?;
        let refresh_token = session.tokens.refresh_token.clone().ok_or_else(|| {
            tracing::debug!(session_id = %session.id, "Session has no refresh token");
            GatewayError::TokenInvalid(TokenError::Malformed)
        })?;

        let grant = RefreshGrant {
            refresh_token,
            username: session.username.clone(),
        };
        let provider: &P = &self.provider;
        let refresh = &grant;
        let tokens = with_retry_and_timeout(
            self.config.retry.clone(),
            self.config.provider_timeout,
            move || provider.refresh_token(refresh),
        )
        .await?;

        let validated = self.validator.validate(&tokens.access_token).await?;
        let rotated = self.sessions.rotate(&session, &validated, tokens).await?;
        Ok(AuthResponse::session(rotated))
    }

    /// Revoke a session by ID
    pub async fn revoke_session(&self, session_id: SessionId) -> Result<(), GatewayError> {
        self.sessions.revoke(session_id).await
    }

    /// Revoke the session behind a handle
    pub async fn revoke_handle(&self, handle: &str) -> Result<SessionId, GatewayError> {
        self.sessions.revoke_handle(handle).await
    }

    /// Resolve a handle to the details of its active session
    pub async fn validate_session(&self, handle: &str) -> Result<SessionInfo, GatewayError> {
        let session = self.sessions.validate(handle).await?;
        Ok(SessionInfo::from(&session))
    }

    /// Whether a session is active
    pub async fn is_active(&self, session_id: SessionId) -> bool {
        self.sessions.is_active(session_id).await
    }

    /// Change the password of the user behind a session
    pub async fn change_password(
        &self,
        handle: &str,
        previous_password: &str,
        proposed_password: &str,
    ) -> Result<(), GatewayError> {
        if proposed_password.is_empty() {
            return Err(GatewayError::InvalidRequest("new password is required".to_string()));
        }
        let session = self.sessions.validate(handle).await?;

        let provider: &P = &self.provider;
        let access_token = session.tokens.access_token.as_str();
        with_retry_and_timeout(
            self.config.retry.clone(),
            self.config.provider_timeout,
            move || provider.change_password(access_token, previous_password, proposed_password),
        )
        .await?;

        tracing::info!(session_id = %session.id, "Password changed");
        Ok(())
    }

    // =========================================================================
    // Tokens and maintenance
    // =========================================================================

    /// Validate a provider-issued token directly
    pub async fn validate_token(&self, raw: &str) -> Result<ValidatedToken, GatewayError> {
        Ok(self.validator.validate(raw).await?)
    }

    /// Make sure a fresh signing key set is loaded
    pub async fn warm_keys(&self) -> Result<usize, GatewayError> {
        let keys = self.validator.keys().warm().await?;
        Ok(keys.len())
    }

    /// Purge expired flows and sessions past their audit window
    pub async fn purge_expired(&self) -> Result<PurgeReport, GatewayError> {
        let flows = self.flows.purge_expired();
        let sessions = self.sessions.purge_expired().await?;
        Ok(PurgeReport { flows, sessions })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn flows(&self) -> &FlowOrchestrator<P, S> {
        &self.flows
    }

    pub fn sessions(&self) -> &SessionManager<S> {
        &self.sessions
    }
}

impl<P: IdentityProvider, S: SessionStore> std::fmt::Debug for Gateway<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("issuer", &self.config.cognito_issuer())
            .field("flows", &self.flows)
            .finish_non_exhaustive()
    }
}
