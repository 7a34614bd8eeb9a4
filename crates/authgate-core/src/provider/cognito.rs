//! Cognito user pool provider
//!
//! Speaks the user pool JSON 1.1 API directly over `reqwest`. Every operation
//! the gateway uses is a public (unsigned) user pool call authenticated by the
//! app client id and, when configured, the SECRET_HASH.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use authgate_types::ChallengeKind;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{
    ChallengeAnswer, ChallengeContext, CodeDelivery, Credentials, IdentityProvider,
    IssuedChallenge, KeySet, ProviderError, ProviderResult, RefreshGrant, SignUpOutcome,
    SignUpRequest, TerminalKind, TokenSet,
};
use crate::config::GatewayConfig;
use crate::crypto::secret_hash;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
    #[serde(default)]
    challenge_parameters: HashMap<String, String>,
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: u64,
    token_type: Option<String>,
}

impl From<AuthenticationResult> for TokenSet {
    fn from(result: AuthenticationResult) -> Self {
        Self {
            access_token: result.access_token,
            id_token: result.id_token,
            refresh_token: result.refresh_token,
            expires_in: result.expires_in,
            token_type: result.token_type.unwrap_or_else(|| "Bearer".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignUpResponse {
    user_confirmed: bool,
    user_sub: String,
    code_delivery_details: Option<CodeDeliveryDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ForgotPasswordResponse {
    code_delivery_details: Option<CodeDeliveryDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CodeDeliveryDetails {
    attribute_name: Option<String>,
    delivery_medium: Option<String>,
    destination: Option<String>,
}

impl From<CodeDeliveryDetails> for CodeDelivery {
    fn from(details: CodeDeliveryDetails) -> Self {
        Self {
            destination: details.destination,
            medium: details.delivery_medium,
            attribute: details.attribute_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
}

/// Empty success body
#[derive(Debug, Deserialize)]
struct Empty {}

// ============================================================================
// Provider
// ============================================================================

/// Cognito user pool client
#[derive(Clone)]
pub struct CognitoProvider {
    endpoint: String,
    jwks_url: String,
    client_id: String,
    client_secret: Option<String>,
    http_client: reqwest::Client,
}

impl CognitoProvider {
    /// Create a provider with an HTTP client tuned for low-latency calls
    pub fn new(config: &GatewayConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.provider_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(config, http_client)
    }

    /// Create a provider with a caller-supplied HTTP client
    pub fn with_client(config: &GatewayConfig, http_client: reqwest::Client) -> Self {
        Self {
            endpoint: config.provider_endpoint(),
            jwks_url: config.jwks_url(),
            client_id: config.cognito_client_id.clone(),
            client_secret: config.cognito_client_secret.clone(),
            http_client,
        }
    }

    /// SECRET_HASH for `username`, if the app client has a secret
    fn secret_hash(&self, username: &str) -> Result<Option<String>, ProviderError> {
        self.client_secret
            .as_deref()
            .map(|secret| secret_hash(username, &self.client_id, secret))
            .transpose()
            .map_err(|e| {
                tracing::error!("Failed to compute secret hash: {}", e);
                ProviderError::terminal(TerminalKind::Rejected, "SecretHashFailed")
            })
    }

    /// Insert SECRET_HASH into a parameter map when needed
    fn with_secret_hash(
        &self,
        mut params: Map<String, Value>,
        username: &str,
    ) -> Result<Map<String, Value>, ProviderError> {
        if let Some(hash) = self.secret_hash(username)? {
            params.insert("SECRET_HASH".to_string(), Value::String(hash));
        }
        Ok(params)
    }

    /// Invoke one user pool operation
    async fn call<T: DeserializeOwned>(&self, operation: &str, body: Value) -> Result<T, ProviderError> {
        let response = self
            .http_client
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(operation, "Provider request failed: {}", e);
                ProviderError::Transient(format!("{operation} request failed"))
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                tracing::error!(operation, "Failed to parse provider response: {}", e);
                ProviderError::terminal(TerminalKind::Rejected, "MalformedResponse")
            });
        }

        let error_type = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error_type)
            .unwrap_or_default();
        let code = error_type
            .rsplit('#')
            .next()
            .unwrap_or_default()
            .to_string();

        tracing::debug!(operation, status = status.as_u16(), %code, "Provider returned error");
        Err(classify_error(status.as_u16(), code))
    }

    async fn authenticate(&self, operation: &str, body: Value) -> ProviderResult {
        match self.call::<AuthResponse>(operation, body).await {
            Ok(response) => auth_response_to_result(response),
            Err(err) => err.into(),
        }
    }
}

impl std::fmt::Debug for CognitoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitoProvider")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityProvider for CognitoProvider {
    async fn initiate_auth(&self, credentials: &Credentials) -> ProviderResult {
        let params = Map::from_iter([
            ("USERNAME".to_string(), json!(credentials.username)),
            ("PASSWORD".to_string(), json!(credentials.password)),
        ]);
        let params = match self.with_secret_hash(params, &credentials.username) {
            Ok(params) => params,
            Err(err) => return err.into(),
        };

        self.authenticate(
            "InitiateAuth",
            json!({
                "AuthFlow": "USER_PASSWORD_AUTH",
                "ClientId": self.client_id,
                "AuthParameters": params,
            }),
        )
        .await
    }

    async fn respond_to_challenge(
        &self,
        context: &ChallengeContext,
        answer: &ChallengeAnswer,
    ) -> ProviderResult {
        let Some(challenge_name) = challenge_name(&context.kind) else {
            return ProviderResult::TerminalError {
                kind: TerminalKind::Rejected,
                code: format!("UnsupportedChallenge:{}", context.kind),
            };
        };

        let mut responses = Map::new();
        responses.insert("USERNAME".to_string(), json!(context.username));
        match (&context.kind, answer) {
            (ChallengeKind::SmsMfa, ChallengeAnswer::Code { code }) => {
                responses.insert("SMS_MFA_CODE".to_string(), json!(code));
            }
            (ChallengeKind::SoftwareTokenMfa, ChallengeAnswer::Code { code }) => {
                responses.insert("SOFTWARE_TOKEN_MFA_CODE".to_string(), json!(code));
            }
            (ChallengeKind::EmailOtp, ChallengeAnswer::Code { code }) => {
                responses.insert("EMAIL_OTP_CODE".to_string(), json!(code));
            }
            (ChallengeKind::NewPasswordRequired, ChallengeAnswer::NewPassword { new_password }) => {
                responses.insert("NEW_PASSWORD".to_string(), json!(new_password));
            }
            (ChallengeKind::Other(_), ChallengeAnswer::Code { code }) => {
                responses.insert("ANSWER".to_string(), json!(code));
            }
            _ => {
                return ProviderResult::TerminalError {
                    kind: TerminalKind::Rejected,
                    code: "AnswerDoesNotFitChallenge".to_string(),
                };
            }
        }
        let responses = match self.with_secret_hash(responses, &context.username) {
            Ok(responses) => responses,
            Err(err) => return err.into(),
        };

        self.authenticate(
            "RespondToAuthChallenge",
            json!({
                "ChallengeName": challenge_name,
                "ClientId": self.client_id,
                "Session": context.session,
                "ChallengeResponses": responses,
            }),
        )
        .await
    }

    async fn fetch_signing_keys(&self) -> Result<KeySet, ProviderError> {
        tracing::debug!("Fetching JWKS from {}", self.jwks_url);

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch JWKS: {}", e);
                ProviderError::Transient("JWKS request failed".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!("JWKS fetch returned status: {}", status);
            return Err(if status.is_server_error() {
                ProviderError::Transient(format!("JWKS status {}", status.as_u16()))
            } else {
                ProviderError::terminal(TerminalKind::Rejected, format!("JwksStatus{}", status.as_u16()))
            });
        }

        response.json::<KeySet>().await.map_err(|e| {
            tracing::error!("Failed to parse JWKS: {}", e);
            ProviderError::terminal(TerminalKind::Rejected, "MalformedJwks")
        })
    }

    async fn refresh_token(&self, grant: &RefreshGrant) -> Result<TokenSet, ProviderError> {
        let params = Map::from_iter([(
            "REFRESH_TOKEN".to_string(),
            json!(grant.refresh_token),
        )]);
        let params = self.with_secret_hash(params, &grant.username)?;

        let response: AuthResponse = self
            .call(
                "InitiateAuth",
                json!({
                    "AuthFlow": "REFRESH_TOKEN_AUTH",
                    "ClientId": self.client_id,
                    "AuthParameters": params,
                }),
            )
            .await?;

        let mut tokens: TokenSet = response
            .authentication_result
            .ok_or_else(|| ProviderError::terminal(TerminalKind::Rejected, "MissingAuthenticationResult"))?
            .into();
        // Refresh responses omit the refresh token; the caller keeps using the old one
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(grant.refresh_token.clone());
        }
        Ok(tokens)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<SignUpOutcome, ProviderError> {
        let mut body = Map::from_iter([
            ("ClientId".to_string(), json!(self.client_id)),
            ("Username".to_string(), json!(request.email)),
            ("Password".to_string(), json!(request.password)),
            (
                "UserAttributes".to_string(),
                json!([{ "Name": "email", "Value": request.email }]),
            ),
        ]);
        if let Some(hash) = self.secret_hash(&request.email)? {
            body.insert("SecretHash".to_string(), json!(hash));
        }

        let response: SignUpResponse = self.call("SignUp", Value::Object(body)).await?;
        tracing::info!(
            user_sub = %response.user_sub,
            confirmed = response.user_confirmed,
            "User signed up"
        );
        Ok(SignUpOutcome {
            user_sub: response.user_sub,
            confirmed: response.user_confirmed,
            delivery: response.code_delivery_details.map(Into::into),
        })
    }

    async fn confirm_sign_up(&self, username: &str, code: &str) -> Result<(), ProviderError> {
        let mut body = Map::from_iter([
            ("ClientId".to_string(), json!(self.client_id)),
            ("Username".to_string(), json!(username)),
            ("ConfirmationCode".to_string(), json!(code)),
        ]);
        if let Some(hash) = self.secret_hash(username)? {
            body.insert("SecretHash".to_string(), json!(hash));
        }
        self.call::<Empty>("ConfirmSignUp", Value::Object(body)).await?;
        Ok(())
    }

    async fn forgot_password(&self, username: &str) -> Result<CodeDelivery, ProviderError> {
        let mut body = Map::from_iter([
            ("ClientId".to_string(), json!(self.client_id)),
            ("Username".to_string(), json!(username)),
        ]);
        if let Some(hash) = self.secret_hash(username)? {
            body.insert("SecretHash".to_string(), json!(hash));
        }
        let response: ForgotPasswordResponse =
            self.call("ForgotPassword", Value::Object(body)).await?;
        Ok(response
            .code_delivery_details
            .map(Into::into)
            .unwrap_or_default())
    }

    async fn confirm_forgot_password(
        &self,
        username: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), ProviderError> {
        let mut body = Map::from_iter([
            ("ClientId".to_string(), json!(self.client_id)),
            ("Username".to_string(), json!(username)),
            ("ConfirmationCode".to_string(), json!(code)),
            ("Password".to_string(), json!(new_password)),
        ]);
        if let Some(hash) = self.secret_hash(username)? {
            body.insert("SecretHash".to_string(), json!(hash));
        }
        self.call::<Empty>("ConfirmForgotPassword", Value::Object(body))
            .await?;
        Ok(())
    }

    async fn change_password(
        &self,
        access_token: &str,
        previous_password: &str,
        proposed_password: &str,
    ) -> Result<(), ProviderError> {
        self.call::<Empty>(
            "ChangePassword",
            json!({
                "AccessToken": access_token,
                "PreviousPassword": previous_password,
                "ProposedPassword": proposed_password,
            }),
        )
        .await?;
        Ok(())
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Classify a user pool error by HTTP status and `__type`
fn classify_error(status: u16, code: String) -> ProviderError {
    let kind = match code.as_str() {
        "NotAuthorizedException" | "UserNotFoundException" => TerminalKind::InvalidCredentials,
        "CodeMismatchException" | "ExpiredCodeException" => TerminalKind::InvalidChallengeResponse,
        "TooManyRequestsException"
        | "LimitExceededException"
        | "ThrottlingException"
        | "TooManyFailedAttemptsException" => TerminalKind::RateLimited,
        "InternalErrorException" | "ServiceUnavailable" => {
            return ProviderError::Transient(code);
        }
        _ if status >= 500 => return ProviderError::Transient(format!("status {status}")),
        _ => TerminalKind::Rejected,
    };
    ProviderError::Terminal { kind, code }
}

fn auth_response_to_result(response: AuthResponse) -> ProviderResult {
    if let Some(result) = response.authentication_result {
        return ProviderResult::Success(result.into());
    }

    match response.challenge_name {
        Some(name) => ProviderResult::ChallengeIssued(IssuedChallenge {
            kind: challenge_kind(&name),
            metadata: challenge_metadata(&response.challenge_parameters),
            session: response.session,
        }),
        None => ProviderResult::TerminalError {
            kind: TerminalKind::Rejected,
            code: "EmptyAuthResponse".to_string(),
        },
    }
}

fn challenge_kind(name: &str) -> ChallengeKind {
    match name {
        "SMS_MFA" => ChallengeKind::SmsMfa,
        "SOFTWARE_TOKEN_MFA" => ChallengeKind::SoftwareTokenMfa,
        "EMAIL_OTP" => ChallengeKind::EmailOtp,
        "NEW_PASSWORD_REQUIRED" => ChallengeKind::NewPasswordRequired,
        other => ChallengeKind::Other(other.to_string()),
    }
}

fn challenge_name(kind: &ChallengeKind) -> Option<&str> {
    match kind {
        ChallengeKind::SmsMfa => Some("SMS_MFA"),
        ChallengeKind::SoftwareTokenMfa => Some("SOFTWARE_TOKEN_MFA"),
        ChallengeKind::EmailOtp => Some("EMAIL_OTP"),
        ChallengeKind::NewPasswordRequired => Some("NEW_PASSWORD_REQUIRED"),
        ChallengeKind::Other(name) => Some(name.as_str()),
        // Not provider challenges: answered through dedicated operations
        ChallengeKind::EmailVerification | ChallengeKind::PasswordResetCode => None,
    }
}

/// Only delivery hints are passed through to clients
fn challenge_metadata(parameters: &HashMap<String, String>) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    if let Some(destination) = parameters.get("CODE_DELIVERY_DESTINATION") {
        metadata.insert("destination".to_string(), destination.clone());
    }
    if let Some(medium) = parameters.get("CODE_DELIVERY_DELIVERY_MEDIUM") {
        metadata.insert("delivery_medium".to_string(), medium.clone());
    }
    metadata
}
