//! Identity gateway over the user directory.
//!
//! Every call goes to the directory; nothing is cached. Directory failures
//! are folded into the crate's coarse outcomes: a lookup that cannot find (or
//! cannot reach) its principal is `NotFound`, everything else is `Rejected`.
//! The directory's own error is logged with the operation name.

use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::principal::{ADMINISTRATOR_GROUP, GENERAL_GROUP, Principal};
use crate::directory::{
    AuthenticationResult, Directory, DirectoryError, DirectoryGroup, DirectoryUser, NewUser,
    UserAttribute,
};
use crate::error::{Error, Result};

/// Input for [`IdentityGateway::create_principal`].
#[derive(Clone, Debug)]
pub struct NewPrincipal {
    pub email: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    /// Explicit group; the bootstrap rule applies when absent.
    pub group: Option<String>,
    pub temporary_password: Option<SecretString>,
}

impl NewPrincipal {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            given_name: None,
            family_name: None,
            group: None,
            temporary_password: None,
        }
    }

    #[must_use]
    pub fn with_names(mut self, given_name: impl Into<String>, family_name: impl Into<String>) -> Self {
        self.given_name = Some(given_name.into());
        self.family_name = Some(family_name.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_temporary_password(mut self, password: SecretString) -> Self {
        self.temporary_password = Some(password);
        self
    }
}

fn log_failure(operation: &'static str, identifier: &str, err: &DirectoryError) {
    match err {
        DirectoryError::UserNotFound | DirectoryError::GroupNotFound => {
            debug!(operation, identifier, "Directory lookup miss: {err}");
        }
        DirectoryError::UserExists | DirectoryError::NotAuthorized(_) => {
            info!(operation, identifier, "Directory refused request: {err}");
        }
        DirectoryError::Service { .. }
        | DirectoryError::Transport(_)
        | DirectoryError::Decode(_) => {
            error!(operation, identifier, "Directory unavailable: {err}");
        }
    }
}

#[derive(Clone)]
pub struct IdentityGateway {
    directory: Arc<dyn Directory>,
    admin_email: String,
}

impl IdentityGateway {
    #[must_use]
    pub fn new(directory: Arc<dyn Directory>, admin_email: impl Into<String>) -> Self {
        Self {
            directory,
            admin_email: admin_email.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Group assigned to a new principal that did not request one.
    #[must_use]
    pub fn default_group_for(&self, email: &str) -> &'static str {
        if email.eq_ignore_ascii_case(&self.admin_email) {
            ADMINISTRATOR_GROUP
        } else {
            GENERAL_GROUP
        }
    }

    /// Resolve a directory user by username, falling back to an exact email
    /// match so principals stay reachable after an email change.
    async fn lookup_user(&self, identifier: &str) -> Result<DirectoryUser, DirectoryError> {
        match self.directory.get_user(identifier).await {
            Err(DirectoryError::UserNotFound) => {
                let mut matches = self.directory.list_users(Some(identifier)).await?;
                if matches.len() > 1 {
                    warn!(identifier, count = matches.len(), "Ambiguous email in directory");
                    return Err(DirectoryError::UserNotFound);
                }
                matches.pop().ok_or(DirectoryError::UserNotFound)
            }
            other => other,
        }
    }

    async fn build_principal(&self, user: &DirectoryUser) -> Result<Principal, DirectoryError> {
        let memberships = self.directory.list_groups_for_user(&user.username).await?;
        Ok(Principal::from_directory(user, &memberships))
    }

    /// Look up a principal by identifier.
    ///
    /// # Errors
    /// Returns `Error::NotFound` on a miss or when the directory fails.
    #[instrument(skip(self))]
    pub async fn find_principal(&self, identifier: &str) -> Result<Principal> {
        let result = async {
            let user = self.lookup_user(identifier).await?;
            self.build_principal(&user).await
        }
        .await;
        result.map_err(|err| {
            log_failure("find_principal", identifier, &err);
            Error::NotFound
        })
    }

    /// Verify credentials against the directory.
    ///
    /// # Errors
    /// Returns `Error::Rejected` on any failure, including transport errors.
    #[instrument(skip(self, secret))]
    pub async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<(Principal, AuthenticationResult)> {
        let result = async {
            let user = self.lookup_user(identifier).await?;
            let auth = self.directory.initiate_auth(&user.username, secret).await?;
            let principal = self.build_principal(&user).await?;
            Ok::<_, DirectoryError>((principal, auth))
        }
        .await;
        result.map_err(|err| {
            log_failure("authenticate", identifier, &err);
            Error::Rejected
        })
    }

    /// All groups defined in the directory. Callers treat the result as a set.
    ///
    /// # Errors
    /// Returns `Error::Rejected` when the directory fails.
    pub async fn list_groups(&self) -> Result<Vec<DirectoryGroup>> {
        self.directory.list_groups().await.map_err(|err| {
            log_failure("list_groups", "-", &err);
            Error::Rejected
        })
    }

    /// Grant a group membership. Granting an existing membership is a no-op.
    ///
    /// # Errors
    /// Returns `Error::NotFound` for unknown principals, `Error::Rejected` otherwise.
    #[instrument(skip(self))]
    pub async fn add_principal_to_group(&self, identifier: &str, group: &str) -> Result<()> {
        let result = async {
            let user = self.lookup_user(identifier).await?;
            let current = self.directory.list_groups_for_user(&user.username).await?;
            if current.iter().any(|membership| membership.name == group) {
                debug!(identifier, group, "Membership already present");
                return Ok(());
            }
            self.directory
                .add_user_to_group(&user.username, group)
                .await
        }
        .await;
        result.map_err(|err| fold_principal_error("add_principal_to_group", identifier, &err))
    }

    /// Replace every membership with `group`.
    ///
    /// # Errors
    /// Returns `Error::NotFound` for unknown principals, `Error::Rejected` otherwise.
    #[instrument(skip(self))]
    pub async fn set_principal_group(&self, identifier: &str, group: &str) -> Result<()> {
        let result = async {
            let user = self.lookup_user(identifier).await?;
            let current = self.directory.list_groups_for_user(&user.username).await?;
            for membership in current.iter().filter(|membership| membership.name != group) {
                self.directory
                    .remove_user_from_group(&user.username, &membership.name)
                    .await?;
            }
            if !current.iter().any(|membership| membership.name == group) {
                self.directory
                    .add_user_to_group(&user.username, group)
                    .await?;
            }
            Ok::<_, DirectoryError>(())
        }
        .await;
        result.map_err(|err| fold_principal_error("set_principal_group", identifier, &err))
    }

    /// Create a directory entry and assign its group. A user whose membership
    /// cannot be granted is removed again, so nothing half-created remains.
    ///
    /// # Errors
    /// Returns `Error::Rejected` when the identifier exists, the group is
    /// unknown or the directory fails.
    #[instrument(skip(self, new), fields(email = %new.email))]
    pub async fn create_principal(&self, new: &NewPrincipal) -> Result<Principal> {
        let mut attributes = vec![UserAttribute::new("email", new.email.clone())];
        if let Some(given_name) = &new.given_name {
            attributes.push(UserAttribute::new("given_name", given_name.clone()));
        }
        if let Some(family_name) = &new.family_name {
            attributes.push(UserAttribute::new("family_name", family_name.clone()));
        }
        let request = NewUser {
            username: new.email.clone(),
            attributes,
            temporary_password: new.temporary_password.clone(),
        };

        let group = new
            .group
            .clone()
            .unwrap_or_else(|| self.default_group_for(&new.email).to_string());

        let result = async {
            let groups = self.directory.list_groups().await?;
            if !groups.iter().any(|known| known.name == group) {
                return Err(DirectoryError::GroupNotFound);
            }
            let user = self.directory.create_user(&request).await?;
            if let Err(err) = self.directory.add_user_to_group(&user.username, &group).await {
                self.discard_user(&user.username).await;
                return Err(err);
            }
            self.build_principal(&user).await
        }
        .await;
        result.map_err(|err| {
            log_failure("create_principal", &new.email, &err);
            Error::Rejected
        })
    }

    /// Remove a user whose creation could not be completed.
    async fn discard_user(&self, username: &str) {
        match self.directory.delete_user(username).await {
            Ok(()) => debug!(username, "Discarded partially created user"),
            Err(err) => error!(username, "Failed to discard partially created user: {err}"),
        }
    }

    /// Rotate a principal's password. Returns `false` on any failure.
    #[instrument(skip(self, previous, proposed, access_token))]
    pub async fn change_secret(
        &self,
        identifier: &str,
        previous: &SecretString,
        proposed: &SecretString,
        access_token: &SecretString,
    ) -> bool {
        match self
            .directory
            .change_password(access_token, previous, proposed)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                log_failure("change_secret", identifier, &err);
                false
            }
        }
    }

    /// Every principal in the directory.
    ///
    /// # Errors
    /// Returns `Error::Rejected` when the directory fails.
    pub async fn list_principals(&self) -> Result<Vec<Principal>> {
        let result = async {
            let users = self.directory.list_users(None).await?;
            let mut principals = Vec::with_capacity(users.len());
            for user in &users {
                principals.push(self.build_principal(user).await?);
            }
            Ok::<_, DirectoryError>(principals)
        }
        .await;
        result.map_err(|err| {
            log_failure("list_principals", "-", &err);
            Error::Rejected
        })
    }

    /// Whether any directory entry carries this email.
    ///
    /// # Errors
    /// Returns `Error::Rejected` when the directory fails.
    pub async fn principal_exists(&self, email: &str) -> Result<bool> {
        match self.directory.list_users(Some(email)).await {
            Ok(users) => Ok(!users.is_empty()),
            Err(err) => {
                log_failure("principal_exists", email, &err);
                Err(Error::Rejected)
            }
        }
    }

    /// Mark a principal's sign-up as confirmed.
    ///
    /// # Errors
    /// Returns `Error::NotFound` for unknown principals, `Error::Rejected` otherwise.
    #[instrument(skip(self))]
    pub async fn confirm_principal(&self, identifier: &str) -> Result<()> {
        let result = async {
            let user = self.lookup_user(identifier).await?;
            self.directory.confirm_sign_up(&user.username).await
        }
        .await;
        result.map_err(|err| fold_principal_error("confirm_principal", identifier, &err))
    }

    /// Replace a principal's email attribute.
    ///
    /// # Errors
    /// Returns `Error::NotFound` for unknown principals, `Error::Rejected` otherwise.
    #[instrument(skip(self))]
    pub async fn update_email(&self, identifier: &str, new_email: &str) -> Result<()> {
        let attributes = [
            UserAttribute::new("email", new_email),
            UserAttribute::new("email_verified", "true"),
        ];
        let result = async {
            let user = self.lookup_user(identifier).await?;
            self.directory
                .update_user_attributes(&user.username, &attributes)
                .await
        }
        .await;
        result.map_err(|err| fold_principal_error("update_email", identifier, &err))
    }

    /// Remove a principal from the directory.
    ///
    /// # Errors
    /// Returns `Error::NotFound` for unknown principals, `Error::Rejected` otherwise.
    #[instrument(skip(self))]
    pub async fn delete_principal(&self, identifier: &str) -> Result<()> {
        let result = async {
            let user = self.lookup_user(identifier).await?;
            self.directory.delete_user(&user.username).await
        }
        .await;
        result.map_err(|err| fold_principal_error("delete_principal", identifier, &err))
    }
}

fn fold_principal_error(operation: &'static str, identifier: &str, err: &DirectoryError) -> Error {
    log_failure(operation, identifier, err);
    match err {
        DirectoryError::UserNotFound => Error::NotFound,
        _ => Error::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;

    const ADMIN: &str = "admin@example.com";

    async fn gateway() -> (Arc<MemoryDirectory>, IdentityGateway) {
        let directory = Arc::new(MemoryDirectory::new());
        directory
            .insert_group(DirectoryGroup::new(ADMINISTRATOR_GROUP))
            .await;
        directory.insert_group(DirectoryGroup::new(GENERAL_GROUP)).await;
        directory
            .insert_user(
                "ada@example.com",
                "correct horse",
                &[("given_name", "Ada"), ("family_name", "Lovelace")],
            )
            .await;
        let gateway = IdentityGateway::new(directory.clone(), ADMIN);
        (directory, gateway)
    }

    #[tokio::test]
    async fn authenticate_then_find_returns_equal_principal() -> Result<()> {
        let (_, gateway) = gateway().await;
        let (principal, auth) = gateway
            .authenticate("ada@example.com", &SecretString::from("correct horse"))
            .await?;
        assert_eq!(principal.email, "ada@example.com");
        assert_eq!(auth.token_type, "Bearer");
        let found = gateway.find_principal("ada@example.com").await?;
        assert_eq!(found, principal);
        Ok(())
    }

    #[tokio::test]
    async fn authenticate_failures_are_uniform() {
        let (directory, gateway) = gateway().await;
        let wrong = gateway
            .authenticate("ada@example.com", &SecretString::from("wrong"))
            .await;
        let missing = gateway
            .authenticate("nobody@example.com", &SecretString::from("correct horse"))
            .await;
        directory.set_available(false);
        let offline = gateway
            .authenticate("ada@example.com", &SecretString::from("correct horse"))
            .await;
        for outcome in [wrong, missing, offline] {
            assert!(matches!(outcome, Err(Error::Rejected)));
        }
    }

    #[tokio::test]
    async fn find_principal_folds_outage_into_not_found() {
        let (directory, gateway) = gateway().await;
        directory.set_available(false);
        assert!(matches!(
            gateway.find_principal("ada@example.com").await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn principal_without_memberships_is_general() -> Result<()> {
        let (_, gateway) = gateway().await;
        assert_eq!(gateway.find_principal("ada@example.com").await?.group, GENERAL_GROUP);
        Ok(())
    }

    #[tokio::test]
    async fn two_memberships_resolve_to_administrator() -> Result<()> {
        let (directory, gateway) = gateway().await;
        directory
            .add_user_to_group("ada@example.com", GENERAL_GROUP)
            .await
            .map_err(|_| Error::Rejected)?;
        directory
            .add_user_to_group("ada@example.com", ADMINISTRATOR_GROUP)
            .await
            .map_err(|_| Error::Rejected)?;
        assert_eq!(
            gateway.find_principal("ada@example.com").await?.group,
            ADMINISTRATOR_GROUP
        );
        Ok(())
    }

    #[tokio::test]
    async fn add_to_group_twice_is_idempotent() -> Result<()> {
        let (directory, gateway) = gateway().await;
        gateway
            .add_principal_to_group("ada@example.com", ADMINISTRATOR_GROUP)
            .await?;
        gateway
            .add_principal_to_group("ada@example.com", ADMINISTRATOR_GROUP)
            .await?;
        assert_eq!(directory.membership_count("ada@example.com").await, Some(1));
        assert_eq!(
            gateway.find_principal("ada@example.com").await?.group,
            ADMINISTRATOR_GROUP
        );
        Ok(())
    }

    #[tokio::test]
    async fn create_principal_assigns_default_group() -> Result<()> {
        let (_, gateway) = gateway().await;
        let admin = gateway.create_principal(&NewPrincipal::new(ADMIN)).await?;
        assert_eq!(admin.group, ADMINISTRATOR_GROUP);
        let user = gateway
            .create_principal(&NewPrincipal::new("bob@example.com").with_names("Bob", "Smith"))
            .await?;
        assert_eq!(user.group, GENERAL_GROUP);
        assert_eq!(user.full_name(), "Bob Smith");
        let explicit = gateway
            .create_principal(&NewPrincipal::new("eve@example.com").with_group(ADMINISTRATOR_GROUP))
            .await?;
        assert_eq!(explicit.group, ADMINISTRATOR_GROUP);
        Ok(())
    }

    #[tokio::test]
    async fn create_existing_principal_is_rejected() {
        let (_, gateway) = gateway().await;
        assert!(matches!(
            gateway
                .create_principal(&NewPrincipal::new("ada@example.com"))
                .await,
            Err(Error::Rejected)
        ));
    }

    #[tokio::test]
    async fn unknown_group_creates_nothing() -> Result<()> {
        let (directory, gateway) = gateway().await;
        assert!(matches!(
            gateway
                .create_principal(&NewPrincipal::new("bob@example.com").with_group("superuser"))
                .await,
            Err(Error::Rejected)
        ));
        assert_eq!(directory.membership_count("bob@example.com").await, None);
        let retried = gateway
            .create_principal(&NewPrincipal::new("bob@example.com"))
            .await?;
        assert_eq!(retried.group, GENERAL_GROUP);
        Ok(())
    }

    /// Delegates to a memory directory but refuses every membership grant.
    struct MembershipFails(MemoryDirectory);

    #[async_trait::async_trait]
    impl Directory for MembershipFails {
        async fn get_user(&self, username: &str) -> Result<DirectoryUser, DirectoryError> {
            self.0.get_user(username).await
        }
        async fn list_users(&self, email: Option<&str>) -> Result<Vec<DirectoryUser>, DirectoryError> {
            self.0.list_users(email).await
        }
        async fn create_user(&self, user: &NewUser) -> Result<DirectoryUser, DirectoryError> {
            self.0.create_user(user).await
        }
        async fn update_user_attributes(
            &self,
            username: &str,
            attributes: &[UserAttribute],
        ) -> Result<(), DirectoryError> {
            self.0.update_user_attributes(username, attributes).await
        }
        async fn confirm_sign_up(&self, username: &str) -> Result<(), DirectoryError> {
            self.0.confirm_sign_up(username).await
        }
        async fn delete_user(&self, username: &str) -> Result<(), DirectoryError> {
            self.0.delete_user(username).await
        }
        async fn initiate_auth(
            &self,
            username: &str,
            password: &SecretString,
        ) -> Result<AuthenticationResult, DirectoryError> {
            self.0.initiate_auth(username, password).await
        }
        async fn list_groups(&self) -> Result<Vec<DirectoryGroup>, DirectoryError> {
            self.0.list_groups().await
        }
        async fn create_group(&self, group: &DirectoryGroup) -> Result<(), DirectoryError> {
            self.0.create_group(group).await
        }
        async fn add_user_to_group(&self, _: &str, _: &str) -> Result<(), DirectoryError> {
            Err(DirectoryError::Service {
                kind: "InternalErrorException (500)".to_string(),
                message: "membership write failed".to_string(),
            })
        }
        async fn remove_user_from_group(&self, username: &str, group: &str) -> Result<(), DirectoryError> {
            self.0.remove_user_from_group(username, group).await
        }
        async fn list_groups_for_user(&self, username: &str) -> Result<Vec<DirectoryGroup>, DirectoryError> {
            self.0.list_groups_for_user(username).await
        }
        async fn change_password(
            &self,
            access_token: &SecretString,
            previous: &SecretString,
            proposed: &SecretString,
        ) -> Result<(), DirectoryError> {
            self.0.change_password(access_token, previous, proposed).await
        }
    }

    #[tokio::test]
    async fn failed_membership_discards_created_user() -> Result<()> {
        let inner = MemoryDirectory::new();
        inner.insert_group(DirectoryGroup::new(GENERAL_GROUP)).await;
        let directory = Arc::new(MembershipFails(inner));
        let gateway = IdentityGateway::new(directory.clone(), ADMIN);

        assert!(matches!(
            gateway
                .create_principal(&NewPrincipal::new("bob@example.com"))
                .await,
            Err(Error::Rejected)
        ));
        assert_eq!(directory.0.membership_count("bob@example.com").await, None);
        Ok(())
    }

    #[tokio::test]
    async fn set_principal_group_replaces_memberships() -> Result<()> {
        let (directory, gateway) = gateway().await;
        gateway
            .add_principal_to_group("ada@example.com", ADMINISTRATOR_GROUP)
            .await?;
        gateway
            .set_principal_group("ada@example.com", GENERAL_GROUP)
            .await?;
        assert_eq!(directory.membership_count("ada@example.com").await, Some(1));
        assert_eq!(gateway.find_principal("ada@example.com").await?.group, GENERAL_GROUP);
        Ok(())
    }

    #[tokio::test]
    async fn principal_reachable_by_new_email() -> Result<()> {
        let (_, gateway) = gateway().await;
        gateway
            .update_email("ada@example.com", "countess@example.com")
            .await?;
        let principal = gateway.find_principal("countess@example.com").await?;
        assert_eq!(principal.email, "countess@example.com");
        assert!(gateway.principal_exists("countess@example.com").await?);
        assert!(!gateway.principal_exists("ada@example.com").await?);
        Ok(())
    }

    #[tokio::test]
    async fn change_secret_needs_valid_access_token() -> Result<()> {
        let (_, gateway) = gateway().await;
        let (_, auth) = gateway
            .authenticate("ada@example.com", &SecretString::from("correct horse"))
            .await?;
        assert!(
            !gateway
                .change_secret(
                    "ada@example.com",
                    &SecretString::from("correct horse"),
                    &SecretString::from("battery staple"),
                    &SecretString::from("forged"),
                )
                .await
        );
        assert!(
            gateway
                .change_secret(
                    "ada@example.com",
                    &SecretString::from("correct horse"),
                    &SecretString::from("battery staple"),
                    &SecretString::from(auth.access_token),
                )
                .await
        );
        assert!(
            gateway
                .authenticate("ada@example.com", &SecretString::from("battery staple"))
                .await
                .is_ok()
        );
        Ok(())
    }

    #[tokio::test]
    async fn delete_principal_then_lookup_misses() -> Result<()> {
        let (_, gateway) = gateway().await;
        gateway.delete_principal("ada@example.com").await?;
        assert!(matches!(
            gateway.find_principal("ada@example.com").await,
            Err(Error::NotFound)
        ));
        assert!(matches!(
            gateway.delete_principal("ada@example.com").await,
            Err(Error::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn list_principals_includes_every_user() -> Result<()> {
        let (directory, gateway) = gateway().await;
        directory.insert_user("bob@example.com", "pw", &[]).await;
        let principals = gateway.list_principals().await?;
        let emails: Vec<&str> = principals.iter().map(|p| p.email.as_str()).collect();
        assert_eq!(emails, vec!["ada@example.com", "bob@example.com"]);
        Ok(())
    }
}
