use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::{require_group, resolve_caller};
use crate::auth::{ADMINISTRATOR_GROUP, AuthState};

/// A role an administrator can assign.
#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq, Eq)]
pub struct GroupView {
    pub name: String,
    pub description: Option<String>,
    pub precedence: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/v1/groups",
    responses(
        (status = 200, description = "Groups defined in the directory", body = [GroupView]),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Caller is not an administrator"),
        (status = 503, description = "Directory unavailable")
    ),
    tag = "admin"
)]
pub async fn list_groups(headers: HeaderMap, auth: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let caller = match resolve_caller(&headers, &auth).await {
        Ok(caller) => caller,
        Err(status) => return status.into_response(),
    };
    if let Err(status) = require_group(caller, ADMINISTRATOR_GROUP) {
        return status.into_response();
    }

    match auth.gateway().list_groups().await {
        Ok(groups) => {
            let mut views: Vec<GroupView> = groups
                .into_iter()
                .map(|group| GroupView {
                    name: group.name,
                    description: group.description,
                    precedence: group.precedence,
                })
                .collect();
            views.sort_by(|left, right| left.name.cmp(&right.name));
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(_) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
