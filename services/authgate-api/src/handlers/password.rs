//! Password handlers (reset, change)

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::shared::{
    auth_response, check_rate_limit, timed, validate_identifier, validate_secret_length,
};
use crate::error::ApiResult;
use crate::extractors::SessionHandle;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub username: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub previous_password: String,
    pub proposed_password: String,
}

#[derive(Debug, Serialize)]
pub struct ChangePasswordResponse {
    pub changed: bool,
}

/// POST /api/v1/auth/password/forgot
///
/// Start a password reset. The reset code and new password are submitted
/// through the challenge endpoint.
pub async fn forgot_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ApiResult<Response> {
    check_rate_limit(&state, addr).await?;
    validate_identifier(&req.username, "username")?;

    let response = timed(
        "password_reset",
        state.gateway.start_password_reset(&req.username),
    )
    .await?;
    Ok(auth_response(response))
}

/// POST /api/v1/auth/password/change
pub async fn change_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    handle: SessionHandle,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<Json<ChangePasswordResponse>> {
    check_rate_limit(&state, addr).await?;
    validate_secret_length(&req.previous_password, "previous_password")?;
    validate_secret_length(&req.proposed_password, "proposed_password")?;

    timed(
        "change_password",
        state.gateway.change_password(
            handle.as_str(),
            &req.previous_password,
            &req.proposed_password,
        ),
    )
    .await?;
    Ok(Json(ChangePasswordResponse { changed: true }))
}
