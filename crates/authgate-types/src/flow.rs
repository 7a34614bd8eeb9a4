//! Credential flow types

use serde::{Deserialize, Serialize};

/// Stage of a credential flow
///
/// Stages are ordered. A flow only ever moves to a later stage or to
/// `Failed`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStage {
    /// Flow created, provider not yet answered
    Initiated,
    /// Provider asked for a secondary step
    ChallengeIssued,
    /// Provider accepted the challenge answer
    Confirmed,
    /// Flow finished successfully
    Completed,
    /// Flow finished unsuccessfully
    Failed,
}

impl FlowStage {
    /// Whether the stage is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: FlowStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            // Repeated challenges keep the flow in ChallengeIssued
            Self::ChallengeIssued => matches!(self, Self::Initiated | Self::ChallengeIssued),
            _ => next > self,
        }
    }
}

impl std::fmt::Display for FlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::ChallengeIssued => write!(f, "challenge_issued"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Kind of multi-step flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Username/password sign-in, possibly with MFA
    SignIn,
    /// Registration followed by code verification
    SignUp,
    /// Forgotten password reset by emailed code
    PasswordReset,
}

impl FlowKind {
    /// Wire name, also used as a metrics label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignIn => "sign_in",
            Self::SignUp => "sign_up",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary step requested before a flow can complete
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Code sent by SMS
    SmsMfa,
    /// TOTP authenticator code
    SoftwareTokenMfa,
    /// One-time code sent by email
    EmailOtp,
    /// Provider requires the user to choose a new password
    NewPasswordRequired,
    /// Sign-up confirmation code
    EmailVerification,
    /// Forgotten-password confirmation code plus the new password
    PasswordResetCode,
    /// A challenge the gateway passes through without interpreting
    Other(String),
}

impl ChallengeKind {
    /// Whether the challenge is answered with a one-time code
    pub fn expects_code(&self) -> bool {
        matches!(
            self,
            Self::SmsMfa | Self::SoftwareTokenMfa | Self::EmailOtp | Self::EmailVerification
        )
    }
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SmsMfa => write!(f, "sms_mfa"),
            Self::SoftwareTokenMfa => write!(f, "software_token_mfa"),
            Self::EmailOtp => write!(f, "email_otp"),
            Self::NewPasswordRequired => write!(f, "new_password_required"),
            Self::EmailVerification => write!(f, "email_verification"),
            Self::PasswordResetCode => write!(f, "password_reset_code"),
            Self::Other(name) => write!(f, "{}", name.to_ascii_lowercase()),
        }
    }
}
