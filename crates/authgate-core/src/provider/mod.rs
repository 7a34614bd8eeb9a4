//! Identity provider capability interface
//!
//! The gateway never talks to the identity provider directly; it goes
//! through [`IdentityProvider`]. Responses from multi-step operations are a
//! closed tagged variant ([`ProviderResult`]) so the orchestrator matches on
//! a small set of outcomes instead of inspecting provider payloads.

pub mod cognito;

use std::collections::HashMap;

use async_trait::async_trait;
use authgate_types::{ChallengeKind, FlowId};
use serde::{Deserialize, Serialize};

use crate::crypto::hash_token;
use crate::retry::RetryableError;

// ============================================================================
// Requests
// ============================================================================

/// Username and password
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Answer to a pending challenge
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengeAnswer {
    /// One-time code (MFA, email verification)
    Code { code: String },
    /// Replacement password for a forced password change
    NewPassword { new_password: String },
    /// Reset code together with the new password
    CodeAndPassword { code: String, new_password: String },
}

impl ChallengeAnswer {
    /// Whether this answer has the shape the challenge expects
    pub fn fits(&self, kind: &ChallengeKind) -> bool {
        match (self, kind) {
            (Self::Code { .. }, k) if k.expects_code() => true,
            (Self::NewPassword { .. }, ChallengeKind::NewPasswordRequired) => true,
            (Self::CodeAndPassword { .. }, ChallengeKind::PasswordResetCode) => true,
            (Self::Code { .. }, ChallengeKind::Other(_)) => true,
            _ => false,
        }
    }

    /// Stable digest of the answer, used to recognize replays
    pub fn fingerprint(&self) -> String {
        let material = match self {
            Self::Code { code } => format!("code:{code}"),
            Self::NewPassword { new_password } => format!("new_password:{new_password}"),
            Self::CodeAndPassword { code, new_password } => {
                format!("code_and_password:{code}:{new_password}")
            }
        };
        hash_token(&material)
    }
}

impl std::fmt::Debug for ChallengeAnswer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Self::Code { .. } => "Code",
            Self::NewPassword { .. } => "NewPassword",
            Self::CodeAndPassword { .. } => "CodeAndPassword",
        };
        f.debug_tuple("ChallengeAnswer").field(&variant).finish()
    }
}

/// Everything the provider needs to continue a challenged flow
#[derive(Debug, Clone)]
pub struct ChallengeContext {
    pub flow_id: FlowId,
    pub username: String,
    pub kind: ChallengeKind,
    /// Opaque provider session token carried between steps
    pub session: Option<String>,
}

/// Refresh request
#[derive(Clone)]
pub struct RefreshGrant {
    pub refresh_token: String,
    /// Provider username, needed for SECRET_HASH
    pub username: String,
}

impl std::fmt::Debug for RefreshGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshGrant")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// New account registration
#[derive(Clone, Deserialize)]
pub struct SignUpRequest {
    /// Email address, also used as the username
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Tokens issued by the provider
#[derive(Clone, Deserialize, Serialize)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub token_type: String,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// A challenge the provider wants answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub kind: ChallengeKind,
    /// Non-secret hints for the client (delivery destination, medium)
    pub metadata: HashMap<String, String>,
    pub session: Option<String>,
}

/// Where a confirmation code was sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDelivery {
    pub destination: Option<String>,
    pub medium: Option<String>,
    pub attribute: Option<String>,
}

impl CodeDelivery {
    /// Metadata map exposed with the challenge
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        if let Some(destination) = &self.destination {
            metadata.insert("destination".to_string(), destination.clone());
        }
        if let Some(medium) = &self.medium {
            metadata.insert("delivery_medium".to_string(), medium.clone());
        }
        if let Some(attribute) = &self.attribute {
            metadata.insert("attribute".to_string(), attribute.clone());
        }
        metadata
    }
}

/// Result of a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpOutcome {
    pub user_sub: String,
    pub confirmed: bool,
    pub delivery: Option<CodeDelivery>,
}

/// Published signing keys
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySet {
    pub keys: Vec<Jwk>,
}

/// Individual JWK (JSON Web Key)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    pub n: String,
    pub e: String,
}

/// Outcome of an authentication step
#[derive(Debug, Clone)]
pub enum ProviderResult {
    /// Credentials accepted, tokens issued
    Success(TokenSet),
    /// Another step is required
    ChallengeIssued(IssuedChallenge),
    /// Network or availability failure, may succeed on retry
    TransientError(String),
    /// Will not succeed on retry
    TerminalError { kind: TerminalKind, code: String },
}

/// Successful authentication step
#[derive(Debug, Clone)]
pub enum AuthProgress {
    Tokens(TokenSet),
    Challenge(IssuedChallenge),
}

impl ProviderResult {
    /// Split into progress and failure for retry handling
    pub fn into_result(self) -> Result<AuthProgress, ProviderError> {
        match self {
            Self::Success(tokens) => Ok(AuthProgress::Tokens(tokens)),
            Self::ChallengeIssued(challenge) => Ok(AuthProgress::Challenge(challenge)),
            Self::TransientError(message) => Err(ProviderError::Transient(message)),
            Self::TerminalError { kind, code } => Err(ProviderError::Terminal { kind, code }),
        }
    }
}

impl From<ProviderError> for ProviderResult {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(message) => Self::TransientError(message),
            ProviderError::Terminal { kind, code } => Self::TerminalError { kind, code },
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Class of a terminal provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    /// Wrong password or unknown user
    InvalidCredentials,
    /// Wrong or expired one-time code
    InvalidChallengeResponse,
    /// Provider throttled the caller
    RateLimited,
    /// Anything else the provider refused
    Rejected,
}

/// Provider failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider transient failure: {0}")]
    Transient(String),

    /// `code` is the provider's own identifier, for logs only
    #[error("provider terminal failure: {kind:?}")]
    Terminal { kind: TerminalKind, code: String },
}

impl ProviderError {
    pub fn terminal(kind: TerminalKind, code: impl Into<String>) -> Self {
        Self::Terminal {
            kind,
            code: code.into(),
        }
    }

    /// Whether this is a wrong challenge answer
    pub fn is_invalid_challenge_response(&self) -> bool {
        matches!(
            self,
            Self::Terminal {
                kind: TerminalKind::InvalidChallengeResponse,
                ..
            }
        )
    }
}

impl RetryableError for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<tokio::time::error::Elapsed> for ProviderError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Transient("provider call timed out".to_string())
    }
}

// ============================================================================
// Capability interface
// ============================================================================

/// Operations the gateway needs from the identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Start authentication with username and password
    async fn initiate_auth(&self, credentials: &Credentials) -> ProviderResult;

    /// Answer a pending challenge
    async fn respond_to_challenge(
        &self,
        context: &ChallengeContext,
        answer: &ChallengeAnswer,
    ) -> ProviderResult;

    /// Fetch the current signing key set
    async fn fetch_signing_keys(&self) -> Result<KeySet, ProviderError>;

    /// Exchange a refresh token for fresh tokens
    async fn refresh_token(&self, grant: &RefreshGrant) -> Result<TokenSet, ProviderError>;

    /// Register a new user
    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, ProviderError>;

    /// Confirm a registration with the emailed code
    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), ProviderError>;

    /// Send a password reset code
    async fn forgot_password(&self, username: &str) -> Result<CodeDelivery, ProviderError>;

    /// Set a new password using a reset code
    async fn confirm_forgot_password(
        &self,
        username: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError>;

    /// Change the password of an authenticated user
    async fn change_password(
        &self,
        access_token: &str,
        previous_password: &str,
        proposed_password: &str,
    ) -> Result<(), ProviderError>;
}
