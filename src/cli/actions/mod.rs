pub mod backends;
pub mod server;
pub mod setup;

// Single `match` over `Action`, kept apart so this file only grows by a variant.
mod run;

use secrecy::SecretString;

use crate::auth::Profile;
use crate::directory::DirectoryTarget;
use crate::notify::MailerConfig;
use crate::store::StoreTarget;

#[derive(Debug)]
pub enum Action {
    Server(Settings),
    Setup(Settings),
    RecreateDb(Settings),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}

/// Runtime configuration shared by every action, resolved from flags and
/// `BACKSTAGE_*` variables.
#[derive(Debug)]
pub struct Settings {
    pub profile: Profile,
    pub port: u16,
    pub directory: DirectoryTarget,
    pub user_pool_id: Option<String>,
    pub app_client_id: Option<String>,
    pub store: StoreTarget,
    pub secret_key: Option<SecretString>,
    pub admin_email: String,
    pub admin_password: Option<SecretString>,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub confirm_token_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub email_change_token_ttl_seconds: i64,
    pub mail: MailerConfig,
}
