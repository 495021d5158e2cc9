//! One-shot provisioning: tables, role groups, the bootstrap administrator
//! and seeded content areas. Every step tolerates state left by an earlier run.

use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info, instrument, warn};

use super::{Settings, backends};
use crate::{
    auth::{ADMINISTRATOR_GROUP, GENERAL_GROUP, IdentityGateway, NewPrincipal},
    content::ContentRepository,
    directory::DirectoryGroup,
    store::{DocumentStore, Table},
};

/// Content areas created with their default value during setup.
pub const SEEDED_CONTENT: [&str; 1] = ["about"];

/// Role groups and their precedence; lower wins when a user is in both.
const ROLE_GROUPS: [(&str, i64, &str); 2] = [
    (ADMINISTRATOR_GROUP, 0, "Administrators"),
    (GENERAL_GROUP, 10, "General users"),
];

/// Execute the setup action.
/// # Errors
/// Returns an error if any provisioning step fails.
pub async fn execute(settings: Settings) -> Result<()> {
    let directory = backends::connect_directory(&settings)?;
    let store = backends::connect_store(&settings).await?;
    let gateway = IdentityGateway::new(directory, settings.admin_email.clone());

    provision(
        &gateway,
        &store,
        &settings.admin_email,
        backends::admin_password(&settings),
    )
    .await?;

    if settings.directory.is_memory() {
        warn!("Setup ran against the in-memory directory; nothing outlives this process");
    }
    info!("Setup complete");
    Ok(())
}

/// Execute the recreate-db action: drop and create every table.
/// # Errors
/// Returns an error if the store rejects a DDL statement.
pub async fn recreate(settings: Settings) -> Result<()> {
    let store = backends::connect_store(&settings).await?;
    for table in Table::ALL {
        store
            .drop_table(table)
            .await
            .with_context(|| format!("Failed to drop table {table}"))?;
        store
            .create_table(table)
            .await
            .with_context(|| format!("Failed to create table {table}"))?;
        info!(%table, "Table recreated");
    }
    Ok(())
}

/// Bring directory and store to the state the application expects.
///
/// # Errors
/// Returns an error if a step fails, or if the administrator is missing and no
/// password is available to create it.
#[instrument(skip(gateway, store, admin_password))]
pub async fn provision(
    gateway: &IdentityGateway,
    store: &Arc<dyn DocumentStore>,
    admin_email: &str,
    admin_password: Option<SecretString>,
) -> Result<()> {
    for table in Table::ALL {
        store
            .create_table(table)
            .await
            .with_context(|| format!("Failed to create table {table}"))?;
    }

    ensure_groups(gateway).await?;
    ensure_admin(gateway, admin_email, admin_password).await?;

    let content = ContentRepository::new(Arc::clone(store));
    for name in SEEDED_CONTENT {
        content
            .get_or_default(name)
            .await
            .with_context(|| format!("Failed to seed content area {name}"))?;
    }

    Ok(())
}

async fn ensure_groups(gateway: &IdentityGateway) -> Result<()> {
    let existing: HashSet<String> = gateway
        .list_groups()
        .await
        .context("Failed to list directory groups")?
        .into_iter()
        .map(|group| group.name)
        .collect();

    for (name, precedence, description) in ROLE_GROUPS {
        if existing.contains(name) {
            debug!(group = name, "Group already exists");
            continue;
        }
        let group = DirectoryGroup::new(name)
            .with_precedence(precedence)
            .with_description(description);
        gateway
            .directory()
            .create_group(&group)
            .await
            .with_context(|| format!("Failed to create group {name}"))?;
        info!(group = name, "Group created");
    }
    Ok(())
}

async fn ensure_admin(
    gateway: &IdentityGateway,
    admin_email: &str,
    admin_password: Option<SecretString>,
) -> Result<()> {
    if gateway.principal_exists(admin_email).await? {
        debug!("Administrator already exists");
        return gateway
            .add_principal_to_group(admin_email, ADMINISTRATOR_GROUP)
            .await
            .context("Failed to assign the administrator group");
    }

    let password = admin_password
        .ok_or_else(|| anyhow!("BACKSTAGE_ADMIN_PASSWORD is required to create {admin_email}"))?;
    let new = NewPrincipal::new(admin_email)
        .with_names("Admin", "Account")
        .with_group(ADMINISTRATOR_GROUP)
        .with_temporary_password(password);
    gateway
        .create_principal(&new)
        .await
        .context("Failed to create the administrator")?;

    // Directories that force a password change on admin-created users refuse this.
    if let Err(err) = gateway.confirm_principal(admin_email).await {
        warn!("Administrator created but not confirmed: {err}");
    }
    info!("Administrator created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, SessionAdapter};
    use crate::directory::{Directory, MemoryDirectory};
    use crate::store::MemoryDocumentStore;

    const ADMIN: &str = "root@example.com";

    fn fixtures() -> (Arc<MemoryDirectory>, IdentityGateway, Arc<dyn DocumentStore>) {
        let directory = Arc::new(MemoryDirectory::new());
        let gateway = IdentityGateway::new(directory.clone(), ADMIN);
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::empty());
        (directory, gateway, store)
    }

    #[tokio::test]
    async fn provision_bootstraps_everything() -> Result<()> {
        let (directory, gateway, store) = fixtures();
        provision(&gateway, &store, ADMIN, Some(SecretString::from("hunter22"))).await?;

        for table in Table::ALL {
            assert!(store.table_exists(table).await?);
        }
        assert_eq!(
            store.get(Table::Editors, "about").await?.as_deref(),
            Some(" ")
        );

        let groups = directory.list_groups().await?;
        assert_eq!(groups.len(), 2);
        assert_eq!(directory.is_confirmed(ADMIN).await, Some(true));

        let sessions = SessionAdapter::new(gateway.clone(), store.clone(), 60);
        let principal = sessions
            .login(&Credentials::new(ADMIN, "hunter22"))
            .await?;
        assert_eq!(principal.group, ADMINISTRATOR_GROUP);
        Ok(())
    }

    #[tokio::test]
    async fn provision_is_idempotent() -> Result<()> {
        let (directory, gateway, store) = fixtures();
        provision(&gateway, &store, ADMIN, Some(SecretString::from("hunter22"))).await?;
        store.put(Table::Editors, "about", "Edited").await?;

        provision(&gateway, &store, ADMIN, None).await?;

        assert_eq!(directory.list_groups().await?.len(), 2);
        assert_eq!(directory.membership_count(ADMIN).await, Some(1));
        assert_eq!(
            store.get(Table::Editors, "about").await?.as_deref(),
            Some("Edited")
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_admin_password_is_an_error() {
        let (_directory, gateway, store) = fixtures();
        let result = provision(&gateway, &store, ADMIN, None).await;
        assert!(
            result
                .err()
                .is_some_and(|err| err.to_string().contains("BACKSTAGE_ADMIN_PASSWORD"))
        );
    }

    #[tokio::test]
    async fn recreate_runs_against_memory_store() -> Result<()> {
        let settings = backends::tests::settings(crate::auth::Profile::Testing);
        recreate(settings).await?;
        Ok(())
    }
}
