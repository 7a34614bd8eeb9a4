//! Gateway errors

use authgate_types::ErrorKind;
use thiserror::Error;

use crate::provider::{ProviderError, TerminalKind};

/// Token validation failures
///
/// The detail is kept for logs and tests. Clients only ever see
/// `TOKEN_INVALID` (or `PROVIDER_UNAVAILABLE` for key fetch failures).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("bad signature")]
    BadSignature,

    #[error("malformed token")]
    Malformed,

    #[error("audience mismatch")]
    AudienceMismatch,

    #[error("issuer mismatch")]
    IssuerMismatch,

    /// Key id not present in the signing key set, even after a refresh
    #[error("unknown signing key")]
    UnknownKey,

    #[error("signing key fetch failed")]
    KeyFetchFailed,
}

/// Gateway errors, one variant per normalized kind
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Wrong credential or wrong challenge answer (never says which)
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A different challenge must be answered first
    #[error("challenge required")]
    ChallengeRequired,

    /// Flow timed out or is unknown
    #[error("flow expired")]
    FlowExpired,

    /// Flow already completed or failed
    #[error("flow already terminal")]
    FlowAlreadyTerminal,

    /// Too many invalid challenge answers
    #[error("retry budget exhausted")]
    RetryBudgetExhausted,

    /// Token failed validation
    #[error("invalid token")]
    TokenInvalid(TokenError),

    /// Session has been revoked
    #[error("session revoked")]
    SessionRevoked,

    /// No session with that id
    #[error("session not found")]
    SessionNotFound,

    /// Provider unreachable after retries
    #[error("identity provider unavailable")]
    ProviderUnavailable,

    /// Provider refused the request
    #[error("request rejected by identity provider")]
    ProviderRejected,

    /// Malformed client input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Normalized kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::ChallengeRequired => ErrorKind::ChallengeRequired,
            Self::FlowExpired => ErrorKind::FlowExpired,
            Self::FlowAlreadyTerminal => ErrorKind::FlowAlreadyTerminal,
            Self::RetryBudgetExhausted => ErrorKind::RetryBudgetExhausted,
            Self::TokenInvalid(_) => ErrorKind::TokenInvalid,
            Self::SessionRevoked => ErrorKind::SessionRevoked,
            Self::SessionNotFound => ErrorKind::SessionNotFound,
            Self::ProviderUnavailable => ErrorKind::ProviderUnavailable,
            Self::ProviderRejected => ErrorKind::ProviderRejected,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidCredentials | Self::TokenInvalid(_) | Self::SessionRevoked => 401,
            Self::RetryBudgetExhausted => 403,
            Self::SessionNotFound => 404,
            Self::ChallengeRequired | Self::FlowAlreadyTerminal => 409,
            Self::FlowExpired => 410,
            Self::ProviderRejected => 422,
            Self::InvalidRequest(_) => 400,
            Self::ProviderUnavailable => 503,
            Self::Internal(_) => 500,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        self.kind().as_str()
    }
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::KeyFetchFailed => Self::ProviderUnavailable,
            other => Self::TokenInvalid(other),
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transient(message) => {
                tracing::warn!(%message, "provider unavailable after retries");
                Self::ProviderUnavailable
            }
            ProviderError::Terminal { kind, code } => {
                // Provider codes stay in the logs
                tracing::debug!(?kind, %code, "provider terminal error");
                match kind {
                    TerminalKind::InvalidCredentials | TerminalKind::InvalidChallengeResponse => {
                        Self::InvalidCredentials
                    }
                    TerminalKind::RateLimited | TerminalKind::Rejected => Self::ProviderRejected,
                }
            }
        }
    }
}
