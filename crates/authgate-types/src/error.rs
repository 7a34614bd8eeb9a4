//! Normalized error taxonomy

use serde::{Deserialize, Serialize};

/// Error kinds a client can observe
///
/// This is the only failure vocabulary that leaves the gateway. Provider
/// error identifiers and the failing credential factor are never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidCredentials,
    ChallengeRequired,
    FlowExpired,
    FlowAlreadyTerminal,
    RetryBudgetExhausted,
    TokenInvalid,
    SessionRevoked,
    SessionNotFound,
    ProviderUnavailable,
    ProviderRejected,
    InvalidRequest,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorKind {
    /// Whether the client may retry the same request later
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ProviderUnavailable)
    }

    /// Error code for API responses
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::ChallengeRequired => "CHALLENGE_REQUIRED",
            Self::FlowExpired => "FLOW_EXPIRED",
            Self::FlowAlreadyTerminal => "FLOW_ALREADY_TERMINAL",
            Self::RetryBudgetExhausted => "RETRY_BUDGET_EXHAUSTED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::SessionRevoked => "SESSION_REVOKED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            Self::ProviderRejected => "PROVIDER_REJECTED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
