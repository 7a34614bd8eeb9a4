//! Credential flow handlers (sign-in, challenge, sign-up, refresh, revoke)

use std::net::SocketAddr;

use authgate_core::{ChallengeAnswer, Credentials, FlowId, SessionId, SignUpRequest};
use axum::extract::{ConnectInfo, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::shared::{
    auth_response, check_rate_limit, timed, validate_identifier, validate_secret_length,
};
use crate::error::ApiResult;
use crate::extractors::{cleared_session_cookie, SessionHandle};
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub flow_id: FlowId,
    pub answer: ChallengeAnswer,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
    pub session_id: SessionId,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/auth/sign-in
///
/// Start a sign-in. Completes immediately or returns the pending challenge.
pub async fn sign_in(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<Response> {
    check_rate_limit(&state, addr).await?;
    validate_identifier(&credentials.username, "username")?;
    validate_secret_length(&credentials.password, "password")?;

    let response = timed("sign_in", state.gateway.start_auth(credentials)).await?;
    Ok(auth_response(response))
}

/// POST /api/v1/auth/challenge
///
/// Answer the pending challenge of a flow
pub async fn respond_to_challenge(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<ChallengeRequest>,
) -> ApiResult<Response> {
    check_rate_limit(&state, addr).await?;
    match &req.answer {
        ChallengeAnswer::Code { code } => validate_secret_length(code, "code")?,
        ChallengeAnswer::NewPassword { new_password } => {
            validate_secret_length(new_password, "new_password")?
        }
        ChallengeAnswer::CodeAndPassword { code, new_password } => {
            validate_secret_length(code, "code")?;
            validate_secret_length(new_password, "new_password")?;
        }
    }

    let response = timed(
        "respond_to_challenge",
        state.gateway.respond_to_challenge(req.flow_id, req.answer),
    )
    .await?;
    Ok(auth_response(response))
}

/// POST /api/v1/auth/sign-up
///
/// Register a new user; the response carries the pending email verification
pub async fn sign_up(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<SignUpRequest>,
) -> ApiResult<Response> {
    check_rate_limit(&state, addr).await?;
    validate_identifier(&req.email, "email")?;
    validate_secret_length(&req.password, "password")?;

    let response = timed("sign_up", state.gateway.start_sign_up(req)).await?;
    Ok(auth_response(response))
}

/// POST /api/v1/auth/refresh
///
/// Exchange the current session for a new one
pub async fn refresh(
    State(state): State<AppState>,
    handle: SessionHandle,
) -> ApiResult<Response> {
    let response = timed("refresh", state.gateway.refresh_session(handle.as_str())).await?;
    Ok(auth_response(response))
}

/// POST /api/v1/auth/revoke
///
/// Revoke the current session and clear its cookie
pub async fn revoke(
    State(state): State<AppState>,
    handle: SessionHandle,
) -> ApiResult<impl IntoResponse> {
    let session_id = timed("revoke", state.gateway.revoke_handle(handle.as_str())).await?;

    Ok((
        [(header::SET_COOKIE, cleared_session_cookie())],
        Json(RevokeResponse {
            revoked: true,
            session_id,
        }),
    ))
}
