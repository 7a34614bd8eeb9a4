//! Authgate Core - Authentication gateway business logic
//!
//! Mediates between client applications and a managed identity provider:
//! signed token validation with a shared signing-key cache, multi-step
//! credential flows driven as an explicit state machine, and gateway-issued
//! sessions backed by validated provider tokens.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod flow;
pub mod keys;
pub mod provider;
pub mod retry;
pub mod service;
pub mod session;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigValidationError, GatewayConfig};
pub use crypto::{constant_time_eq, constant_time_str_eq, hash_token, secret_hash, HmacKey, HmacKeyError};
pub use error::{GatewayError, TokenError};
pub use flow::{FlowOrchestrator, FlowOutcome, FlowSnapshot};
pub use keys::{KeyCache, SigningKeySet};
pub use provider::cognito::CognitoProvider;
pub use provider::{
    AuthProgress, ChallengeAnswer, ChallengeContext, CodeDelivery, Credentials, IdentityProvider,
    IssuedChallenge, Jwk, KeySet, ProviderError, ProviderResult, RefreshGrant, SignUpOutcome,
    SignUpRequest, TerminalKind, TokenSet,
};
pub use retry::{with_retry, with_retry_and_timeout, RetryConfig, RetryPolicy, RetryableError};
pub use service::{AuthResponse, AuthStatus, ChallengeView, Gateway, PurgeReport, SessionInfo};
pub use session::{InMemorySessionStore, Session, SessionGrant, SessionManager, SessionStore};
pub use token::{Token, TokenValidator, ValidatedToken};

pub use authgate_types::{ChallengeKind, ErrorKind, FlowId, FlowKind, FlowStage, SessionId};
