//! Session handlers

use authgate_core::SessionInfo;
use axum::extract::State;
use axum::Json;

use super::shared::timed;
use crate::error::ApiResult;
use crate::extractors::SessionHandle;
use crate::state::AppState;

/// GET /api/v1/auth/session
///
/// Describe the session behind the presented handle
pub async fn current_session(
    State(state): State<AppState>,
    handle: SessionHandle,
) -> ApiResult<Json<SessionInfo>> {
    let info = timed("validate_session", state.gateway.validate_session(handle.as_str())).await?;
    Ok(Json(info))
}
