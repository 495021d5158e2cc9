//! Session endpoints for cookie and bearer auth.

use axum::{
    Form, Json,
    extract::{Extension, FromRequest, Request},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CONTENT_TYPE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::{SESSION_COOKIE_NAME, error_body, extract_session_token, resolve_caller};
use crate::auth::{AuthConfig, AuthState, Credentials, CurrentPrincipal, Principal};
use crate::error::Error;

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq, Eq)]
pub struct SessionResponse {
    pub email: String,
    pub full_name: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub group: String,
    pub enabled: bool,
    pub is_admin: bool,
}

impl From<&Principal> for SessionResponse {
    fn from(principal: &Principal) -> Self {
        Self {
            email: principal.email.clone(),
            full_name: principal.full_name(),
            given_name: principal.given_name.clone(),
            family_name: principal.family_name.clone(),
            group: principal.group.clone(),
            enabled: principal.enabled,
            is_admin: CurrentPrincipal::from(principal.clone()).is_admin(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

fn denial() -> Response {
    error_body(StatusCode::UNAUTHORIZED, "Invalid email or password")
}

#[utoipa::path(
    get,
    path = "/v1/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> impl IntoResponse {
    match resolve_caller(&headers, &auth).await {
        Ok(CurrentPrincipal::Authenticated(principal)) => {
            (StatusCode::OK, Json(SessionResponse::from(&principal))).into_response()
        }
        Ok(CurrentPrincipal::Anonymous) => StatusCode::NO_CONTENT.into_response(),
        Err(status) => status.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/session",
    request_body(
        content = LoginRequest,
        content_type = "application/json",
        description = "Credentials as JSON or application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Session opened", body = SessionResponse),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Invalid email or password", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(auth: Extension<Arc<AuthState>>, request: Request) -> impl IntoResponse {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"));

    let payload = if is_form {
        Form::<LoginRequest>::from_request(request, &())
            .await
            .map(|Form(payload)| payload)
            .map_err(IntoResponse::into_response)
    } else {
        Json::<LoginRequest>::from_request(request, &())
            .await
            .map(|Json(payload)| payload)
            .map_err(IntoResponse::into_response)
    };
    let payload = match payload {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let credentials = Credentials::new(payload.email.trim(), payload.password);
    match auth.sessions().login(&credentials).await {
        Ok(principal) => {
            let Some(token) = principal.session.as_deref() else {
                error!("Login succeeded without a session reference");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            };
            let mut headers = HeaderMap::new();
            match session_cookie(auth.config(), auth.sessions().session_ttl_seconds(), token) {
                Ok(cookie) => {
                    headers.insert(SET_COOKIE, cookie);
                }
                Err(err) => {
                    error!("Failed to build session cookie: {err}");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
            (StatusCode::OK, headers, Json(SessionResponse::from(&principal))).into_response()
        }
        Err(Error::Rejected | Error::NotFound) => denial(),
        Err(err) => {
            error!("Failed to open session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(err) = auth.sessions().invalidate(&token).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// `HttpOnly` cookie carrying the raw session reference.
fn session_cookie(
    config: &AuthConfig,
    ttl_seconds: i64,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.secure_cookies() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.secure_cookies() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_is_secure_only_for_https_frontends() -> Result<(), InvalidHeaderValue> {
        let plain = session_cookie(&AuthConfig::new("http://localhost:8080".into()), 60, "abc")?;
        let secure = session_cookie(&AuthConfig::new("https://admin.example.com".into()), 60, "abc")?;
        assert_eq!(
            plain.to_str().unwrap_or_default(),
            "backstage_session=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );
        assert!(secure.to_str().unwrap_or_default().ends_with("; Secure"));
        Ok(())
    }

    #[test]
    fn clearing_cookie_expires_it() -> Result<(), InvalidHeaderValue> {
        let cookie = clear_session_cookie(&AuthConfig::default())?;
        assert!(cookie.to_str().unwrap_or_default().contains("Max-Age=0"));
        Ok(())
    }
}
