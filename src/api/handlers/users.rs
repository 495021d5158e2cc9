//! Administrator-only user management: listing, invitations, account type
//! changes and deletion. An administrator can never change or delete their
//! own account.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use super::{error_body, require_group, resolve_caller};
use crate::auth::{ADMINISTRATOR_GROUP, AuthState, NewPrincipal, Principal};
use crate::error::Error;

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq, Eq)]
pub struct UserView {
    pub email: String,
    pub full_name: String,
    pub group: String,
    pub enabled: bool,
}

impl From<&Principal> for UserView {
    fn from(principal: &Principal) -> Self {
        Self {
            email: principal.email.clone(),
            full_name: principal.full_name(),
            group: principal.group.clone(),
            enabled: principal.enabled,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct InviteRequest {
    pub email: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    /// Defaults to `general`, or `administrator` for the configured admin email.
    pub group: Option<String>,
    /// Set a password up front instead of waiting for the invitee.
    pub password: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct GroupChange {
    pub group: String,
}

async fn require_admin(headers: &HeaderMap, auth: &AuthState) -> Result<Principal, Response> {
    let caller = resolve_caller(headers, auth)
        .await
        .map_err(IntoResponse::into_response)?;
    require_group(caller, ADMINISTRATOR_GROUP).map_err(IntoResponse::into_response)
}

fn is_self(caller: &Principal, email: &str) -> bool {
    caller.email.eq_ignore_ascii_case(email.trim())
}

#[utoipa::path(
    get,
    path = "/v1/users",
    responses(
        (status = 200, description = "Registered users", body = [UserView]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 503, description = "Directory unavailable")
    ),
    tag = "admin"
)]
pub async fn list_users(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> impl IntoResponse {
    if let Err(response) = require_admin(&headers, &auth).await {
        return response;
    }
    match auth.gateway().list_principals().await {
        Ok(principals) => {
            let mut views: Vec<UserView> = principals.iter().map(UserView::from).collect();
            views.sort_by(|left, right| left.email.cmp(&right.email));
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/users/invite",
    request_body = InviteRequest,
    responses(
        (status = 201, description = "User created and invitation queued", body = UserView),
        (status = 400, description = "Invalid or already registered email, or unknown group"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Caller is not an administrator")
    ),
    tag = "admin"
)]
pub async fn invite_user(
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    Json(request): Json<InviteRequest>,
) -> impl IntoResponse {
    let caller = match require_admin(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };

    let mut invite = NewPrincipal::new(request.email);
    invite.given_name = request.given_name;
    invite.family_name = request.family_name;
    invite.group = request.group;
    invite.temporary_password = request.password.map(SecretString::from);

    match auth.workflows().invite(&invite).await {
        Ok(principal) => {
            info!(invited = %principal.email, by = %caller.email, "User invited");
            (StatusCode::CREATED, Json(UserView::from(&principal))).into_response()
        }
        Err(Error::Rejected | Error::NotFound) => error_body(
            StatusCode::BAD_REQUEST,
            "The email is invalid or already registered, or the group does not exist",
        ),
        Err(err) => {
            error!("Failed to invite user: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/v1/users/{email}/group",
    params(("email" = String, Path, description = "Email of the user to change")),
    request_body = GroupChange,
    responses(
        (status = 200, description = "Account type changed", body = UserView),
        (status = 400, description = "Own account or unknown group"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "No such user")
    ),
    tag = "admin"
)]
pub async fn change_user_group(
    Path(email): Path<String>,
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    Json(change): Json<GroupChange>,
) -> impl IntoResponse {
    let caller = match require_admin(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if is_self(&caller, &email) {
        return error_body(
            StatusCode::BAD_REQUEST,
            "You cannot change the type of your own account. Ask another administrator to do this",
        );
    }

    let known = match auth.gateway().list_groups().await {
        Ok(groups) => groups.iter().any(|group| group.name == change.group),
        Err(_) => return StatusCode::SERVICE_UNAVAILABLE.into_response(),
    };
    if !known {
        return error_body(StatusCode::BAD_REQUEST, "Unknown group");
    }

    let gateway = auth.gateway();
    let result = match gateway.set_principal_group(email.trim(), &change.group).await {
        Ok(()) => gateway.find_principal(email.trim()).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(principal) => {
            info!(user = %principal.email, group = %principal.group, by = %caller.email, "Account type changed");
            (StatusCode::OK, Json(UserView::from(&principal))).into_response()
        }
        Err(Error::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/users/{email}",
    params(("email" = String, Path, description = "Email of the user to delete")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Own account"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 404, description = "No such user")
    ),
    tag = "admin"
)]
pub async fn delete_user(
    Path(email): Path<String>,
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let caller = match require_admin(&headers, &auth).await {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    if is_self(&caller, &email) {
        return error_body(
            StatusCode::BAD_REQUEST,
            "You cannot delete your own account. Ask another administrator to do this",
        );
    }

    match auth.gateway().delete_principal(email.trim()).await {
        Ok(()) => {
            info!(user = %email.trim(), by = %caller.email, "User deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(Error::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
