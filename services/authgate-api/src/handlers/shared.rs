//! Shared handler utilities
//!
//! Input bounds, metrics and response helpers used across handlers.

use std::net::SocketAddr;
use std::time::Instant;

use authgate_core::AuthResponse;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use crate::error::{ApiError, ApiResult};
use crate::extractors::session_cookie;
use crate::state::AppState;

// ============================================================================
// Input Validation
// ============================================================================

/// Maximum length for usernames and emails
const MAX_IDENTIFIER_LEN: usize = 128;

/// Maximum length for passwords and codes
const MAX_SECRET_LEN: usize = 256;

/// Reject identifiers the provider would never accept.
pub fn validate_identifier(value: &str, field_name: &str) -> Result<(), ApiError> {
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(ApiError::BadRequest(format!(
            "{field_name} too long (max {MAX_IDENTIFIER_LEN} chars)"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(ApiError::BadRequest(format!(
            "{field_name} contains control characters"
        )));
    }
    Ok(())
}

/// Bound the size of secrets before they reach the provider.
pub fn validate_secret_length(value: &str, field_name: &str) -> Result<(), ApiError> {
    if value.len() > MAX_SECRET_LEN {
        return Err(ApiError::BadRequest(format!(
            "{field_name} too long (max {MAX_SECRET_LEN} chars)"
        )));
    }
    Ok(())
}

/// Apply the per-IP limit for credential-bearing routes.
pub async fn check_rate_limit(state: &AppState, addr: SocketAddr) -> ApiResult<()> {
    state.limiter.check_ip(addr.ip()).await
}

// ============================================================================
// Metrics Helpers
// ============================================================================

/// Record operation duration with result label.
///
/// Labels: operation, result (ok/err)
#[inline]
pub fn record_op_duration(operation: &'static str, start: Instant, success: bool) {
    let result = if success { "ok" } else { "err" };
    metrics::histogram!(
        "authgate_operation_duration_seconds",
        "operation" => operation,
        "result" => result
    )
    .record(start.elapsed().as_secs_f64());
}

/// Time a gateway call and convert its error.
pub async fn timed<T, F>(operation: &'static str, fut: F) -> ApiResult<T>
where
    F: std::future::Future<Output = Result<T, authgate_core::GatewayError>>,
{
    let start = Instant::now();
    let result = fut.await;
    record_op_duration(operation, start, result.is_ok());
    result.map_err(|e| {
        tracing::debug!(operation, error = %e, kind = %e.kind(), "Gateway operation failed");
        ApiError::from(e)
    })
}

// ============================================================================
// Responses
// ============================================================================

/// Render an auth response, setting the session cookie when one was issued.
pub fn auth_response(response: AuthResponse) -> Response {
    match &response.session {
        Some(grant) => {
            let max_age = (grant.expires_at - Utc::now()).num_seconds();
            let cookie = session_cookie(&grant.handle, max_age);
            (StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)).into_response()
        }
        None => (StatusCode::OK, Json(response)).into_response(),
    }
}
