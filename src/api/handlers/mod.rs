//! Route handlers and the request-level auth helpers they share.

pub mod account;
pub mod content;
pub mod groups;
pub mod health;
pub mod session;
pub mod users;

use axum::{
    Json,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use tracing::error;

use session::ErrorResponse;

use crate::auth::{AuthState, CurrentPrincipal, Principal};

pub(crate) const SESSION_COOKIE_NAME: &str = "backstage_session";

/// Session reference from a `Bearer` header or the session cookie.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let (key, val) = pair.trim().split_once('=')?;
        (key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty())
            .then(|| val.trim().to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the caller from the request's session reference.
pub(crate) async fn resolve_caller(
    headers: &HeaderMap,
    auth: &AuthState,
) -> Result<CurrentPrincipal, StatusCode> {
    let token = extract_session_token(headers);
    auth.sessions()
        .resolve(token.as_deref(), None)
        .await
        .map_err(|err| {
            error!("Failed to resolve caller: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// JSON `{"error": message}` with the given status.
pub(crate) fn error_body(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// 401 for anonymous callers.
pub(crate) fn require_authenticated(current: CurrentPrincipal) -> Result<Principal, StatusCode> {
    current.into_principal().ok_or(StatusCode::UNAUTHORIZED)
}

/// 401 for anonymous callers, 403 for authenticated non-members.
pub(crate) fn require_group(current: CurrentPrincipal, group: &str) -> Result<Principal, StatusCode> {
    if !current.is_authenticated() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if !current.is_member_of(group) {
        return Err(StatusCode::FORBIDDEN);
    }
    current.into_principal().ok_or(StatusCode::UNAUTHORIZED)
}
