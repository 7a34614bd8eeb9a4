//! Axum extractors for session handles

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Cookie carrying the session handle
pub const SESSION_COOKIE: &str = "authgate_session";

/// Session handle presented by the client
///
/// Only the presence of a handle is checked here; the gateway verifies it.
#[derive(Clone)]
pub struct SessionHandle(pub String);

impl SessionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionHandle(..)")
    }
}

/// Error response for missing or unreadable handles
#[derive(Debug, Serialize)]
struct HandleErrorResponse {
    error: HandleErrorDetail,
}

#[derive(Debug, Serialize)]
struct HandleErrorDetail {
    code: &'static str,
    message: &'static str,
}

/// Handle rejection type
#[derive(Debug)]
pub struct HandleRejection {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
}

impl IntoResponse for HandleRejection {
    fn into_response(self) -> Response {
        let body = HandleErrorResponse {
            error: HandleErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl<S> FromRequestParts<S> for SessionHandle
where
    S: Send + Sync,
{
    type Rejection = HandleRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        extract_handle(parts).map(SessionHandle)
    }
}

/// Extract the handle from the Authorization header or the session cookie
fn extract_handle(parts: &Parts) -> Result<String, HandleRejection> {
    // Try Authorization header first (Bearer handle)
    if let Some(auth_header) = parts.headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| HandleRejection {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_REQUEST",
            message: "Invalid Authorization header encoding",
        })?;

        if let Some(handle) = auth_str.strip_prefix("Bearer ") {
            let handle = handle.trim();
            if !handle.is_empty() {
                return Ok(handle.to_string());
            }
        }
    }

    // Try session cookie
    if let Some(cookie_header) = parts.headers.get(header::COOKIE) {
        let cookie_str = cookie_header.to_str().map_err(|_| HandleRejection {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_REQUEST",
            message: "Invalid Cookie header encoding",
        })?;

        for cookie in cookie_str.split(';') {
            let cookie = cookie.trim();
            if let Some(value) = cookie
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
            {
                if !value.is_empty() {
                    return Ok(value.to_string());
                }
            }
        }
    }

    Err(HandleRejection {
        status: StatusCode::UNAUTHORIZED,
        code: "TOKEN_INVALID",
        message: "No session handle provided",
    })
}

/// `Set-Cookie` value carrying a session handle
pub fn session_cookie(handle: &str, max_age_secs: i64) -> String {
    format!(
        "{SESSION_COOKIE}={handle}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        max_age_secs.max(0)
    )
}

/// `Set-Cookie` value that clears the session cookie
pub fn cleared_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age=0")
}
