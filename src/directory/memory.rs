//! In-process directory for development and tests.

use async_trait::async_trait;
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{
    AuthenticationResult, Directory, DirectoryError, DirectoryGroup, DirectoryUser, NewUser,
    UserAttribute,
};

const ACCESS_TOKEN_TTL_SECONDS: i64 = 3600;

struct StoredUser {
    enabled: bool,
    confirmed: bool,
    password: Option<SecretString>,
    attributes: BTreeMap<String, String>,
    groups: BTreeSet<String>,
}

impl StoredUser {
    fn to_directory_user(&self, username: &str) -> DirectoryUser {
        DirectoryUser {
            username: username.to_string(),
            enabled: self.enabled,
            status: Some(
                if self.confirmed {
                    "CONFIRMED"
                } else {
                    "UNCONFIRMED"
                }
                .to_string(),
            ),
            attributes: self
                .attributes
                .iter()
                .map(|(name, value)| UserAttribute::new(name.clone(), value.clone()))
                .collect(),
        }
    }
}

struct IssuedToken {
    username: String,
    expires_at: i64,
}

#[derive(Default)]
struct State {
    users: BTreeMap<String, StoredUser>,
    groups: BTreeMap<String, DirectoryGroup>,
    access_tokens: HashMap<String, IssuedToken>,
}

/// Directory kept entirely in memory.
///
/// Memberships are held in ordered sets, so `list_groups_for_user` returns
/// group names in ascending order. `set_available(false)` makes every call fail
/// with a service error to exercise outage handling. Access tokens expire
/// after an hour unless configured otherwise.
pub struct MemoryDirectory {
    state: RwLock<State>,
    unavailable: AtomicBool,
    access_token_ttl_seconds: i64,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            unavailable: AtomicBool::new(false),
            access_token_ttl_seconds: ACCESS_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    /// Access tokens currently held, expired or not.
    pub async fn access_token_count(&self) -> usize {
        self.state.read().await.access_tokens.len()
    }

    /// Register a group (replacing any existing definition with the same name).
    pub async fn insert_group(&self, group: DirectoryGroup) {
        let mut state = self.state.write().await;
        state.groups.insert(group.name.clone(), group);
    }

    /// Register a confirmed, enabled user with a password and an `email` attribute.
    pub async fn insert_user(&self, username: &str, password: &str, attributes: &[(&str, &str)]) {
        let mut map: BTreeMap<String, String> = attributes
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        map.entry("email".to_string())
            .or_insert_with(|| username.to_string());

        let mut state = self.state.write().await;
        state.users.insert(
            username.to_string(),
            StoredUser {
                enabled: true,
                confirmed: true,
                password: Some(SecretString::from(password)),
                attributes: map,
                groups: BTreeSet::new(),
            },
        );
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of memberships recorded for a user, or `None` for unknown users.
    pub async fn membership_count(&self, username: &str) -> Option<usize> {
        let state = self.state.read().await;
        state.users.get(username).map(|user| user.groups.len())
    }

    pub async fn is_confirmed(&self, username: &str) -> Option<bool> {
        let state = self.state.read().await;
        state.users.get(username).map(|user| user.confirmed)
    }

    fn check_available(&self) -> Result<(), DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Service {
                kind: "ServiceUnavailable (503)".to_string(),
                message: "directory offline".to_string(),
            });
        }
        Ok(())
    }
}

fn now_unix_seconds() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn random_token() -> String {
    let mut bytes = [0u8; 24];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get_user(&self, username: &str) -> Result<DirectoryUser, DirectoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .users
            .get(username)
            .map(|user| user.to_directory_user(username))
            .ok_or(DirectoryError::UserNotFound)
    }

    async fn list_users(&self, email: Option<&str>) -> Result<Vec<DirectoryUser>, DirectoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .filter(|(_, user)| {
                email.is_none_or(|email| user.attributes.get("email").map(String::as_str) == Some(email))
            })
            .map(|(username, user)| user.to_directory_user(username))
            .collect())
    }

    async fn create_user(&self, user: &NewUser) -> Result<DirectoryUser, DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.username) {
            return Err(DirectoryError::UserExists);
        }
        let mut attributes: BTreeMap<String, String> = user
            .attributes
            .iter()
            .map(|attribute| (attribute.name.clone(), attribute.value.clone()))
            .collect();
        attributes
            .entry("email".to_string())
            .or_insert_with(|| user.username.clone());
        let stored = StoredUser {
            enabled: true,
            confirmed: false,
            password: user.temporary_password.clone(),
            attributes,
            groups: BTreeSet::new(),
        };
        let created = stored.to_directory_user(&user.username);
        state.users.insert(user.username.clone(), stored);
        Ok(created)
    }

    async fn update_user_attributes(
        &self,
        username: &str,
        attributes: &[UserAttribute],
    ) -> Result<(), DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(username)
            .ok_or(DirectoryError::UserNotFound)?;
        for attribute in attributes {
            user.attributes
                .insert(attribute.name.clone(), attribute.value.clone());
        }
        Ok(())
    }

    async fn confirm_sign_up(&self, username: &str) -> Result<(), DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(username)
            .ok_or(DirectoryError::UserNotFound)?;
        user.confirmed = true;
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<(), DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state
            .users
            .remove(username)
            .map(|_| ())
            .ok_or(DirectoryError::UserNotFound)?;
        state.access_tokens.retain(|_, issued| issued.username != username);
        Ok(())
    }

    async fn initiate_auth(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<AuthenticationResult, DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get(username)
            .ok_or(DirectoryError::UserNotFound)?;
        let matches = user
            .password
            .as_ref()
            .is_some_and(|stored| stored.expose_secret() == password.expose_secret());
        if !user.enabled || !matches {
            return Err(DirectoryError::NotAuthorized(
                "Incorrect username or password.".to_string(),
            ));
        }

        let now = now_unix_seconds();
        state.access_tokens.retain(|_, issued| issued.expires_at > now);
        let access_token = random_token();
        state.access_tokens.insert(
            access_token.clone(),
            IssuedToken {
                username: username.to_string(),
                expires_at: now.saturating_add(self.access_token_ttl_seconds),
            },
        );
        Ok(AuthenticationResult {
            access_token,
            id_token: random_token(),
            refresh_token: random_token(),
            expires_in: self.access_token_ttl_seconds,
            token_type: "Bearer".to_string(),
        })
    }

    async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, DirectoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state.groups.values().cloned().collect())
    }

    async fn create_group(&self, group: &DirectoryGroup) -> Result<(), DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.groups.contains_key(&group.name) {
            return Err(DirectoryError::Service {
                kind: "GroupExistsException (400)".to_string(),
                message: format!("group {} already exists", group.name),
            });
        }
        state.groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn add_user_to_group(&self, username: &str, group: &str) -> Result<(), DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if !state.groups.contains_key(group) {
            return Err(DirectoryError::GroupNotFound);
        }
        let user = state
            .users
            .get_mut(username)
            .ok_or(DirectoryError::UserNotFound)?;
        user.groups.insert(group.to_string());
        Ok(())
    }

    async fn remove_user_from_group(
        &self,
        username: &str,
        group: &str,
    ) -> Result<(), DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(username)
            .ok_or(DirectoryError::UserNotFound)?;
        user.groups.remove(group);
        Ok(())
    }

    async fn list_groups_for_user(
        &self,
        username: &str,
    ) -> Result<Vec<DirectoryGroup>, DirectoryError> {
        self.check_available()?;
        let state = self.state.read().await;
        let user = state
            .users
            .get(username)
            .ok_or(DirectoryError::UserNotFound)?;
        Ok(user
            .groups
            .iter()
            .map(|name| {
                state
                    .groups
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| DirectoryGroup::new(name.clone()))
            })
            .collect())
    }

    async fn change_password(
        &self,
        access_token: &SecretString,
        previous: &SecretString,
        proposed: &SecretString,
    ) -> Result<(), DirectoryError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let now = now_unix_seconds();
        let username = match state.access_tokens.get(access_token.expose_secret()) {
            Some(issued) if issued.expires_at > now => issued.username.clone(),
            Some(_) => {
                state.access_tokens.remove(access_token.expose_secret());
                return Err(DirectoryError::NotAuthorized(
                    "Access Token has expired".to_string(),
                ));
            }
            None => {
                return Err(DirectoryError::NotAuthorized(
                    "Invalid Access Token".to_string(),
                ));
            }
        };
        let user = state
            .users
            .get_mut(&username)
            .ok_or(DirectoryError::UserNotFound)?;
        let matches = user
            .password
            .as_ref()
            .is_some_and(|stored| stored.expose_secret() == previous.expose_secret());
        if !matches {
            return Err(DirectoryError::NotAuthorized(
                "Incorrect username or password.".to_string(),
            ));
        }
        user.password = Some(proposed.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        directory.insert_group(DirectoryGroup::new("general")).await;
        directory
            .insert_user("ada@example.com", "secret", &[("given_name", "Ada")])
            .await;
        directory
    }

    #[tokio::test]
    async fn initiate_auth_checks_password() {
        let directory = seeded().await;
        assert!(
            directory
                .initiate_auth("ada@example.com", &SecretString::from("secret"))
                .await
                .is_ok()
        );
        assert!(matches!(
            directory
                .initiate_auth("ada@example.com", &SecretString::from("nope"))
                .await,
            Err(DirectoryError::NotAuthorized(_))
        ));
    }

    #[tokio::test]
    async fn change_password_requires_issued_access_token() -> Result<(), DirectoryError> {
        let directory = seeded().await;
        let auth = directory
            .initiate_auth("ada@example.com", &SecretString::from("secret"))
            .await?;

        let bogus = directory
            .change_password(
                &SecretString::from("bogus"),
                &SecretString::from("secret"),
                &SecretString::from("fresh"),
            )
            .await;
        assert!(matches!(bogus, Err(DirectoryError::NotAuthorized(_))));

        directory
            .change_password(
                &SecretString::from(auth.access_token),
                &SecretString::from("secret"),
                &SecretString::from("fresh"),
            )
            .await?;
        assert!(
            directory
                .initiate_auth("ada@example.com", &SecretString::from("fresh"))
                .await
                .is_ok()
        );
        Ok(())
    }

    #[tokio::test]
    async fn expired_access_token_is_refused_and_pruned() -> Result<(), DirectoryError> {
        let directory = MemoryDirectory::new().with_access_token_ttl_seconds(0);
        directory.insert_user("ada@example.com", "secret", &[]).await;
        let auth = directory
            .initiate_auth("ada@example.com", &SecretString::from("secret"))
            .await?;
        assert_eq!(auth.expires_in, 0);

        let result = directory
            .change_password(
                &SecretString::from(auth.access_token),
                &SecretString::from("secret"),
                &SecretString::from("fresh"),
            )
            .await;
        assert!(matches!(result, Err(DirectoryError::NotAuthorized(_))));
        assert_eq!(directory.access_token_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn logins_prune_expired_tokens() -> Result<(), DirectoryError> {
        let directory = MemoryDirectory::new().with_access_token_ttl_seconds(0);
        directory.insert_user("ada@example.com", "secret", &[]).await;
        for _ in 0..3 {
            directory
                .initiate_auth("ada@example.com", &SecretString::from("secret"))
                .await?;
        }
        // Each login drops the previous, already expired, token.
        assert_eq!(directory.access_token_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn add_user_to_unknown_group_fails() {
        let directory = seeded().await;
        let result = directory
            .add_user_to_group("ada@example.com", "missing")
            .await;
        assert!(matches!(result, Err(DirectoryError::GroupNotFound)));
    }

    #[tokio::test]
    async fn list_users_filters_by_email() -> Result<(), DirectoryError> {
        let directory = seeded().await;
        directory.insert_user("bob@example.com", "pw", &[]).await;
        let matches = directory.list_users(Some("bob@example.com")).await?;
        assert_eq!(matches.len(), 1);
        assert_eq!(directory.list_users(None).await?.len(), 2);
        assert!(directory.list_users(Some("eve@example.com")).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_directory_fails_every_call() {
        let directory = seeded().await;
        directory.set_available(false);
        assert!(matches!(
            directory.get_user("ada@example.com").await,
            Err(DirectoryError::Service { .. })
        ));
        directory.set_available(true);
        assert!(directory.get_user("ada@example.com").await.is_ok());
    }

    #[tokio::test]
    async fn created_users_start_unconfirmed() -> Result<(), DirectoryError> {
        let directory = seeded().await;
        directory
            .create_user(&NewUser {
                username: "new@example.com".to_string(),
                attributes: vec![UserAttribute::new("given_name", "New")],
                temporary_password: None,
            })
            .await?;
        assert_eq!(directory.is_confirmed("new@example.com").await, Some(false));
        directory.confirm_sign_up("new@example.com").await?;
        assert_eq!(directory.is_confirmed("new@example.com").await, Some(true));
        Ok(())
    }
}
