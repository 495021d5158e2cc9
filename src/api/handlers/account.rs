//! Self-service account endpoints that redeem the tokens sent by email.
//!
//! Every endpoint except the reset request needs a signed-in caller: tokens
//! are bound to the caller's address, and a password change needs the
//! directory access token held in the session record.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::{error_body, require_authenticated, resolve_caller, session::SessionResponse};
use crate::auth::{AuthState, Principal};
use crate::error::Error;

#[derive(Deserialize, ToSchema)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Deserialize, ToSchema)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordReset {
    pub token: String,
    pub previous_password: String,
    pub new_password: String,
}

async fn signed_in(headers: &HeaderMap, auth: &AuthState) -> Result<Principal, Response> {
    let caller = resolve_caller(headers, auth)
        .await
        .map_err(IntoResponse::into_response)?;
    require_authenticated(caller).map_err(IntoResponse::into_response)
}

fn invalid_link() -> Response {
    error_body(StatusCode::BAD_REQUEST, "The link is invalid or has expired")
}

#[utoipa::path(
    post,
    path = "/v1/account/confirm",
    request_body = TokenRequest,
    responses(
        (status = 204, description = "Account confirmed"),
        (status = 400, description = "Invalid or expired link"),
        (status = 401, description = "Not signed in")
    ),
    tag = "account"
)]
pub async fn confirm_account(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    Json(request): Json<TokenRequest>,
) -> impl IntoResponse {
    let caller = match signed_in(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if auth.workflows().confirm_account(&caller, &request.token).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        invalid_link()
    }
}

#[utoipa::path(
    post,
    path = "/v1/account/confirm/resend",
    responses(
        (status = 202, description = "Confirmation email queued"),
        (status = 401, description = "Not signed in")
    ),
    tag = "account"
)]
pub async fn resend_confirmation(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let caller = match signed_in(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    match auth.workflows().send_confirmation(&caller) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            error!("Failed to queue confirmation email: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/account/reset-password/request",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "A reset email is queued when the account exists")
    ),
    tag = "account"
)]
pub async fn request_password_reset(
    auth: Extension<Arc<AuthState>>,
    Json(request): Json<EmailRequest>,
) -> impl IntoResponse {
    match auth.workflows().request_password_reset(&request.email).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => {
            error!("Failed to queue reset email: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/account/reset-password",
    request_body = PasswordReset,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Invalid link or password"),
        (status = 401, description = "Not signed in")
    ),
    tag = "account"
)]
pub async fn reset_password(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    Json(request): Json<PasswordReset>,
) -> impl IntoResponse {
    let caller = match signed_in(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let Some(token) = caller.session.as_deref() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let record = match auth.sessions().load(token).await {
        Ok(Some(record)) => record,
        Ok(None) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to load session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let changed = auth
        .workflows()
        .reset_password(
            &caller,
            &request.token,
            &SecretString::from(request.previous_password),
            &SecretString::from(request.new_password),
            &SecretString::from(record.authentication.access_token),
        )
        .await;
    if changed {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_body(
            StatusCode::BAD_REQUEST,
            "The link is invalid or has expired, or the current password is wrong",
        )
    }
}

#[utoipa::path(
    post,
    path = "/v1/account/change-email/request",
    request_body = EmailRequest,
    responses(
        (status = 202, description = "Confirmation sent to the new address"),
        (status = 400, description = "Invalid or already registered email"),
        (status = 401, description = "Not signed in")
    ),
    tag = "account"
)]
pub async fn request_email_change(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    Json(request): Json<EmailRequest>,
) -> impl IntoResponse {
    let caller = match signed_in(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    match auth
        .workflows()
        .request_email_change(&caller, &request.email)
        .await
    {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(Error::Rejected | Error::NotFound) => error_body(
            StatusCode::BAD_REQUEST,
            "The email is invalid or already registered",
        ),
        Err(err) => {
            error!("Failed to queue change-email message: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/account/change-email",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Email changed", body = SessionResponse),
        (status = 400, description = "Invalid or expired link"),
        (status = 401, description = "Not signed in")
    ),
    tag = "account"
)]
pub async fn change_email(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    Json(request): Json<TokenRequest>,
) -> impl IntoResponse {
    let mut caller = match signed_in(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if auth.workflows().change_email(&mut caller, &request.token).await {
        (StatusCode::OK, Json(SessionResponse::from(&caller))).into_response()
    } else {
        invalid_link()
    }
}
