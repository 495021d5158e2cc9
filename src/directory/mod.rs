//! User directory abstraction.
//!
//! The directory is the external identity provider that owns user records,
//! credentials and group memberships. Two implementations exist:
//!
//! - [`HttpDirectory`] speaks the Cognito-compatible JSON protocol over one
//!   shared `reqwest` client. Requests are unsigned, so the endpoint must be a
//!   local emulator or a sidecar proxy that injects credentials.
//! - [`MemoryDirectory`] keeps everything in process for development and tests.
//!
//! Flow Overview:
//! - Parse `BACKSTAGE_DIRECTORY_URL` into a [`DirectoryTarget`].
//! - Build the matching implementation once at startup.
//! - Share it as `Arc<dyn Directory>` with the identity gateway.

mod http;
mod memory;

pub use http::HttpDirectory;
pub use memory::MemoryDirectory;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("user not found")]
    UserNotFound,
    #[error("group not found")]
    GroupNotFound,
    #[error("user already exists")]
    UserExists,
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("directory service error {kind}: {message}")]
    Service { kind: String, message: String },
    #[error("directory transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid directory response: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserAttribute {
    pub name: String,
    pub value: String,
}

impl UserAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A user record as returned by the directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryUser {
    pub username: String,
    pub enabled: bool,
    pub status: Option<String>,
    pub attributes: Vec<UserAttribute>,
}

impl DirectoryUser {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| attribute.value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryGroup {
    pub name: String,
    pub description: Option<String>,
    pub precedence: Option<i64>,
}

impl DirectoryGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            precedence: None,
        }
    }

    #[must_use]
    pub fn with_precedence(mut self, precedence: i64) -> Self {
        self.precedence = Some(precedence);
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Tokens returned by a successful directory login.
///
/// Persisted verbatim inside the session record, so it serializes in clear;
/// `Debug` redacts the token values.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationResult {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

impl std::fmt::Debug for AuthenticationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationResult")
            .field("access_token", &"***")
            .field("id_token", &"***")
            .field("refresh_token", &"***")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Input for creating a directory user.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub attributes: Vec<UserAttribute>,
    pub temporary_password: Option<SecretString>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<DirectoryUser, DirectoryError>;

    /// List users, optionally restricted to an exact email match.
    async fn list_users(&self, email: Option<&str>) -> Result<Vec<DirectoryUser>, DirectoryError>;

    async fn create_user(&self, user: &NewUser) -> Result<DirectoryUser, DirectoryError>;

    async fn update_user_attributes(
        &self,
        username: &str,
        attributes: &[UserAttribute],
    ) -> Result<(), DirectoryError>;

    async fn confirm_sign_up(&self, username: &str) -> Result<(), DirectoryError>;

    async fn delete_user(&self, username: &str) -> Result<(), DirectoryError>;

    async fn initiate_auth(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<AuthenticationResult, DirectoryError>;

    async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, DirectoryError>;

    async fn create_group(&self, group: &DirectoryGroup) -> Result<(), DirectoryError>;

    async fn add_user_to_group(&self, username: &str, group: &str) -> Result<(), DirectoryError>;

    async fn remove_user_from_group(
        &self,
        username: &str,
        group: &str,
    ) -> Result<(), DirectoryError>;

    async fn list_groups_for_user(
        &self,
        username: &str,
    ) -> Result<Vec<DirectoryGroup>, DirectoryError>;

    async fn change_password(
        &self,
        access_token: &SecretString,
        previous: &SecretString,
        proposed: &SecretString,
    ) -> Result<(), DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryTarget {
    Http { endpoint: String },
    Memory,
}

impl DirectoryTarget {
    /// Parse `BACKSTAGE_DIRECTORY_URL` into an HTTP endpoint or the in-memory directory.
    /// # Errors
    /// Returns an error if the value is neither http(s):// nor memory://.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(Self::Http {
                endpoint: trimmed.to_string(),
            });
        }

        if trimmed == "memory://" || trimmed == "memory" {
            return Ok(Self::Memory);
        }

        Err(anyhow!(
            "invalid BACKSTAGE_DIRECTORY_URL: expected http(s)://... or memory://"
        ))
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_http_target() {
        let target = DirectoryTarget::parse("http://127.0.0.1:9229").ok();
        assert_eq!(
            target,
            Some(DirectoryTarget::Http {
                endpoint: "http://127.0.0.1:9229".to_string()
            })
        );
    }

    #[test]
    fn parse_memory_target() {
        assert_eq!(
            DirectoryTarget::parse("memory://").ok(),
            Some(DirectoryTarget::Memory)
        );
    }

    #[test]
    fn parse_rejects_unknown_scheme() {
        assert!(DirectoryTarget::parse("ftp://directory").is_err());
        assert!(DirectoryTarget::parse("").is_err());
    }

    #[test]
    fn authentication_result_debug_redacts_tokens() {
        let result = AuthenticationResult {
            access_token: "access-secret".to_string(),
            id_token: "id-secret".to_string(),
            refresh_token: "refresh-secret".to_string(),
            expires_in: 3600,
            token_type: "Bearer".to_string(),
        };
        let rendered = format!("{result:?}");
        assert!(!rendered.contains("access-secret"));
        assert!(!rendered.contains("refresh-secret"));
        assert!(rendered.contains("3600"));
    }

    #[test]
    fn directory_user_attribute_lookup() {
        let user = DirectoryUser {
            username: "a@example.com".to_string(),
            enabled: true,
            status: None,
            attributes: vec![UserAttribute::new("given_name", "Ada")],
        };
        assert_eq!(user.attribute("given_name"), Some("Ada"));
        assert_eq!(user.attribute("family_name"), None);
    }
}
