use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use super::{require_group, resolve_caller};
use crate::auth::{ADMINISTRATOR_GROUP, AuthState};
use crate::content::ContentRepository;

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq, Eq)]
pub struct ContentView {
    pub name: String,
    pub value: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ContentUpdate {
    pub value: String,
}

/// Content area names are short slugs.
fn valid_name(name: &str) -> bool {
    Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").is_ok_and(|regex| regex.is_match(name))
}

#[utoipa::path(
    get,
    path = "/v1/content/{name}",
    params(("name" = String, Path, description = "Content area name")),
    responses(
        (status = 200, description = "Content area value", body = ContentView),
        (status = 400, description = "Invalid content area name")
    ),
    tag = "content"
)]
pub async fn get_content(
    Path(name): Path<String>,
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    content: Extension<ContentRepository>,
) -> impl IntoResponse {
    if !valid_name(&name) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    // Only editors create missing areas; other readers see the default.
    let editor = resolve_caller(&headers, &auth)
        .await
        .is_ok_and(|caller| caller.is_member_of(ADMINISTRATOR_GROUP));
    let value = if editor {
        content.get_or_default(&name).await
    } else {
        content.read(&name).await
    };
    match value {
        Ok(value) => (StatusCode::OK, Json(ContentView { name, value })).into_response(),
        Err(err) => {
            error!("Failed to read content area: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/v1/content/{name}",
    params(("name" = String, Path, description = "Content area name")),
    request_body = ContentUpdate,
    responses(
        (status = 200, description = "Content area updated", body = ContentView),
        (status = 400, description = "Invalid content area name"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Caller is not an administrator")
    ),
    tag = "content"
)]
pub async fn update_content(
    Path(name): Path<String>,
    headers: HeaderMap,
    auth: Extension<Arc<AuthState>>,
    content: Extension<ContentRepository>,
    Json(update): Json<ContentUpdate>,
) -> impl IntoResponse {
    let caller = match resolve_caller(&headers, &auth).await {
        Ok(caller) => caller,
        Err(status) => return status.into_response(),
    };
    let principal = match require_group(caller, ADMINISTRATOR_GROUP) {
        Ok(principal) => principal,
        Err(status) => return status.into_response(),
    };
    if !valid_name(&name) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    match content.update(&name, &update.value).await {
        Ok(()) => {
            info!(content = %name, editor = %principal.email, "Content area updated");
            (
                StatusCode::OK,
                Json(ContentView {
                    name,
                    value: update.value,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to update content area: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
