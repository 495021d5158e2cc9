//! Cognito-compatible JSON protocol client.
//!
//! Every call is a `POST /` with `X-Amz-Target` naming the action and a JSON
//! body. Error responses carry `__type` (optionally namespaced with `#`) and
//! `message`; the well-known types map onto [`DirectoryError`] variants.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{Instrument, debug, info_span};

use super::{
    AuthenticationResult, Directory, DirectoryError, DirectoryGroup, DirectoryUser, NewUser,
    UserAttribute,
};

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const AUTH_FLOW: &str = "ADMIN_NO_SRP_AUTH";

/// Directory client bound to one user pool and app client.
#[derive(Clone, Debug)]
pub struct HttpDirectory {
    client: Client,
    endpoint: String,
    user_pool_id: String,
    app_client_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireUser {
    username: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    user_status: Option<String>,
    // AdminGetUser says `UserAttributes`, ListUsers/AdminCreateUser say `Attributes`.
    #[serde(default, alias = "UserAttributes")]
    attributes: Vec<UserAttribute>,
}

impl From<WireUser> for DirectoryUser {
    fn from(user: WireUser) -> Self {
        Self {
            username: user.username,
            enabled: user.enabled.unwrap_or(false),
            status: user.user_status,
            attributes: user.attributes,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListUsersResponse {
    #[serde(default)]
    users: Vec<WireUser>,
    #[serde(default)]
    pagination_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateUserResponse {
    user: WireUser,
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireGroup {
    group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    precedence: Option<i64>,
}

impl From<WireGroup> for DirectoryGroup {
    fn from(group: WireGroup) -> Self {
        Self {
            name: group.group_name,
            description: group.description,
            precedence: group.precedence,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListGroupsResponse {
    #[serde(default)]
    groups: Vec<WireGroup>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireAuthenticationResult {
    access_token: String,
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    refresh_token: String,
    expires_in: i64,
    token_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    #[serde(default)]
    authentication_result: Option<WireAuthenticationResult>,
    #[serde(default)]
    challenge_name: Option<String>,
}

impl HttpDirectory {
    /// Build the client once; it is shared by every request for the process lifetime.
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        user_pool_id: String,
        app_client_id: String,
        user_agent: &str,
    ) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            user_pool_id,
            app_client_id,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, action: &str, payload: &Value) -> Result<Value, DirectoryError> {
        let span = info_span!(
            "directory.request",
            http.method = "POST",
            directory.action = action,
            url = %self.endpoint
        );
        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{action}"))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(payload)
            .send()
            .instrument(span)
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        let json: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).map_err(|err| DirectoryError::Decode(err.to_string()))?
        };

        if status.is_success() {
            debug!(action, %status, "directory call succeeded");
            Ok(json)
        } else {
            Err(error_from_response(&json, status.as_u16()))
        }
    }

    async fn call_decode<T: DeserializeOwned>(
        &self,
        action: &str,
        payload: &Value,
    ) -> Result<T, DirectoryError> {
        let json = self.call(action, payload).await?;
        serde_json::from_value(json).map_err(|err| DirectoryError::Decode(err.to_string()))
    }

    async fn collect_groups(
        &self,
        action: &str,
        mut payload: Value,
    ) -> Result<Vec<DirectoryGroup>, DirectoryError> {
        let mut groups = Vec::new();
        loop {
            let page: ListGroupsResponse = self.call_decode(action, &payload).await?;
            groups.extend(page.groups.into_iter().map(DirectoryGroup::from));
            match page.next_token {
                Some(token) if !token.is_empty() => payload["NextToken"] = Value::String(token),
                _ => break,
            }
        }
        Ok(groups)
    }
}

/// Map a wire error body onto a typed error.
fn error_from_response(json: &Value, status: u16) -> DirectoryError {
    let raw_kind = json
        .get("__type")
        .and_then(Value::as_str)
        .unwrap_or("UnknownError");
    let kind = raw_kind.rsplit('#').next().unwrap_or(raw_kind);
    let message = json
        .get("message")
        .or_else(|| json.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match kind {
        "UserNotFoundException" => DirectoryError::UserNotFound,
        "ResourceNotFoundException" => DirectoryError::GroupNotFound,
        "UsernameExistsException" => DirectoryError::UserExists,
        "NotAuthorizedException" | "UserNotConfirmedException" | "PasswordResetRequiredException" => {
            DirectoryError::NotAuthorized(message)
        }
        _ => DirectoryError::Service {
            kind: format!("{kind} ({status})"),
            message,
        },
    }
}

/// `email = "<value>"`, or `None` when the value cannot be quoted safely.
fn email_filter(email: &str) -> Option<String> {
    if email.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return None;
    }
    Some(format!("email = \"{email}\""))
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn get_user(&self, username: &str) -> Result<DirectoryUser, DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": username,
        });
        let user: WireUser = self.call_decode("AdminGetUser", &payload).await?;
        Ok(user.into())
    }

    async fn list_users(&self, email: Option<&str>) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let mut payload = json!({ "UserPoolId": self.user_pool_id });
        if let Some(email) = email {
            let Some(filter) = email_filter(email) else {
                debug!("Refusing to build a user filter from an unquotable identifier");
                return Ok(Vec::new());
            };
            payload["Filter"] = Value::String(filter);
        }

        let mut users = Vec::new();
        loop {
            let page: ListUsersResponse = self.call_decode("ListUsers", &payload).await?;
            users.extend(page.users.into_iter().map(DirectoryUser::from));
            match page.pagination_token {
                Some(token) if !token.is_empty() => {
                    payload["PaginationToken"] = Value::String(token);
                }
                _ => break,
            }
        }
        Ok(users)
    }

    async fn create_user(&self, user: &NewUser) -> Result<DirectoryUser, DirectoryError> {
        let mut payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": user.username,
            "UserAttributes": user.attributes,
            "MessageAction": "SUPPRESS",
        });
        if let Some(password) = &user.temporary_password {
            payload["TemporaryPassword"] = Value::String(password.expose_secret().to_string());
        }
        let response: CreateUserResponse = self.call_decode("AdminCreateUser", &payload).await?;
        Ok(response.user.into())
    }

    async fn update_user_attributes(
        &self,
        username: &str,
        attributes: &[UserAttribute],
    ) -> Result<(), DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": username,
            "UserAttributes": attributes,
        });
        self.call("AdminUpdateUserAttributes", &payload).await?;
        Ok(())
    }

    async fn confirm_sign_up(&self, username: &str) -> Result<(), DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": username,
        });
        self.call("AdminConfirmSignUp", &payload).await?;
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<(), DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": username,
        });
        self.call("AdminDeleteUser", &payload).await?;
        Ok(())
    }

    async fn initiate_auth(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<AuthenticationResult, DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "ClientId": self.app_client_id,
            "AuthFlow": AUTH_FLOW,
            "AuthParameters": {
                "USERNAME": username,
                "PASSWORD": password.expose_secret(),
            },
        });
        let response: InitiateAuthResponse = self.call_decode("AdminInitiateAuth", &payload).await?;

        match (response.authentication_result, response.challenge_name) {
            (Some(result), _) => Ok(AuthenticationResult {
                access_token: result.access_token,
                id_token: result.id_token,
                refresh_token: result.refresh_token,
                expires_in: result.expires_in,
                token_type: result.token_type,
            }),
            (None, Some(challenge)) => Err(DirectoryError::NotAuthorized(format!(
                "challenge required: {challenge}"
            ))),
            (None, None) => Err(DirectoryError::Decode(
                "missing AuthenticationResult".to_string(),
            )),
        }
    }

    async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, DirectoryError> {
        let payload = json!({ "UserPoolId": self.user_pool_id });
        self.collect_groups("ListGroups", payload).await
    }

    async fn create_group(&self, group: &DirectoryGroup) -> Result<(), DirectoryError> {
        let mut payload = json!({
            "UserPoolId": self.user_pool_id,
            "GroupName": group.name,
        });
        if let Some(description) = &group.description {
            payload["Description"] = Value::String(description.clone());
        }
        if let Some(precedence) = group.precedence {
            payload["Precedence"] = Value::from(precedence);
        }
        self.call("CreateGroup", &payload).await?;
        Ok(())
    }

    async fn add_user_to_group(&self, username: &str, group: &str) -> Result<(), DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": username,
            "GroupName": group,
        });
        self.call("AdminAddUserToGroup", &payload).await?;
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        username: &str,
        group: &str,
    ) -> Result<(), DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": username,
            "GroupName": group,
        });
        self.call("AdminRemoveUserFromGroup", &payload).await?;
        Ok(())
    }

    async fn list_groups_for_user(
        &self,
        username: &str,
    ) -> Result<Vec<DirectoryGroup>, DirectoryError> {
        let payload = json!({
            "UserPoolId": self.user_pool_id,
            "Username": username,
        });
        self.collect_groups("AdminListGroupsForUser", payload).await
    }

    async fn change_password(
        &self,
        access_token: &SecretString,
        previous: &SecretString,
        proposed: &SecretString,
    ) -> Result<(), DirectoryError> {
        let payload = json!({
            "AccessToken": access_token.expose_secret(),
            "PreviousPassword": previous.expose_secret(),
            "ProposedPassword": proposed.expose_secret(),
        });
        self.call("ChangePassword", &payload).await?;
        Ok(())
    }
}
