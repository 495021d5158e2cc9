//! Build the long-lived collaborators from [`Settings`]: the directory
//! client, the document store and the assembled [`AuthState`].

use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::Settings;
use crate::{
    APP_USER_AGENT,
    auth::{
        AccountWorkflows, AuthConfig, AuthState, IdentityGateway, SessionAdapter, TokenService,
    },
    directory::{Directory, DirectoryTarget, HttpDirectory, MemoryDirectory},
    notify::{EmailSender, Mailer},
    store::{DocumentStore, MemoryDocumentStore, PgDocumentStore, StoreTarget, Table},
};

const DEVELOPMENT_ADMIN_PASSWORD: &str = "password";

/// # Errors
/// Returns an error if an HTTP directory lacks its ids or its client cannot be built.
pub fn connect_directory(settings: &Settings) -> Result<Arc<dyn Directory>> {
    match &settings.directory {
        DirectoryTarget::Memory => {
            warn!("Using the in-memory directory, users are lost on exit");
            Ok(Arc::new(MemoryDirectory::new()))
        }
        DirectoryTarget::Http { endpoint } => {
            let user_pool_id = settings
                .user_pool_id
                .clone()
                .context("missing user pool id for the HTTP directory")?;
            let app_client_id = settings
                .app_client_id
                .clone()
                .context("missing app client id for the HTTP directory")?;
            let directory =
                HttpDirectory::new(endpoint, user_pool_id, app_client_id, APP_USER_AGENT)
                    .context("Failed to build the directory client")?;
            info!(endpoint = %directory.endpoint(), "Using HTTP directory");
            Ok(Arc::new(directory))
        }
    }
}

/// # Errors
/// Returns an error if the database cannot be reached.
pub async fn connect_store(settings: &Settings) -> Result<Arc<dyn DocumentStore>> {
    match &settings.store {
        StoreTarget::Memory => {
            warn!("Using the in-memory document store, records are lost on exit");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        StoreTarget::Postgres { dsn } => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn)
                .await
                .context("Failed to connect to database")?;
            Ok(Arc::new(PgDocumentStore::new(pool)))
        }
    }
}

/// Fail fast when a persistent store has not been set up yet.
///
/// # Errors
/// Returns an error naming the first missing table.
pub async fn ensure_tables(store: &Arc<dyn DocumentStore>) -> Result<()> {
    for table in Table::ALL {
        if !store.table_exists(table).await? {
            anyhow::bail!("table `{table}` is missing, run `backstage setup` first");
        }
    }
    Ok(())
}

#[must_use]
pub fn auth_config(settings: &Settings) -> AuthConfig {
    AuthConfig::new(settings.frontend_base_url.clone())
        .with_admin_email(settings.admin_email.clone())
        .with_session_ttl_seconds(settings.session_ttl_seconds)
        .with_confirm_token_ttl_seconds(settings.confirm_token_ttl_seconds)
        .with_reset_token_ttl_seconds(settings.reset_token_ttl_seconds)
        .with_email_change_token_ttl_seconds(settings.email_change_token_ttl_seconds)
}

/// Wire gateway, token service, mailer and sessions into one [`AuthState`].
/// Returns the mailer dispatcher handle alongside it.
///
/// # Errors
/// Returns an error if no usable signing key is available for the profile.
pub fn auth_state(
    settings: &Settings,
    directory: Arc<dyn Directory>,
    store: Arc<dyn DocumentStore>,
    sender: Arc<dyn EmailSender>,
) -> Result<(Arc<AuthState>, JoinHandle<()>)> {
    let key = settings.profile.signing_key(settings.secret_key.clone())?;
    let config = auth_config(settings);

    let gateway = IdentityGateway::new(directory, config.admin_email());
    let tokens = TokenService::new(key, &config);
    let (mailer, dispatcher) = Mailer::spawn(sender, settings.mail.clone());

    let sessions = SessionAdapter::new(gateway.clone(), store, config.session_ttl_seconds());
    let workflows = AccountWorkflows::new(gateway, tokens, mailer, config.frontend_base_url());

    Ok((Arc::new(AuthState::new(config, sessions, workflows)), dispatcher))
}

/// The bootstrap administrator password; development profiles fall back to a fixed one.
#[must_use]
pub fn admin_password(settings: &Settings) -> Option<SecretString> {
    if let Some(password) = &settings.admin_password {
        return Some(password.clone());
    }
    if settings.profile.is_production_like() {
        return None;
    }
    warn!("BACKSTAGE_ADMIN_PASSWORD not set, using the development password");
    Some(SecretString::from(DEVELOPMENT_ADMIN_PASSWORD))
}
