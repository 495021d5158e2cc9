use anyhow::{Context, bail};
use clap::{Arg, ArgMatches, Command};

use crate::directory::DirectoryTarget;

pub const ARG_DIRECTORY_URL: &str = "directory-url";
pub const ARG_USER_POOL_ID: &str = "user-pool-id";
pub const ARG_APP_CLIENT_ID: &str = "app-client-id";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DIRECTORY_URL)
                .long("directory-url")
                .help("User directory endpoint (http(s)://host:port) or memory://")
                .env("BACKSTAGE_DIRECTORY_URL")
                .default_value("memory://"),
        )
        .arg(
            Arg::new(ARG_USER_POOL_ID)
                .long("user-pool-id")
                .help("Directory user pool id (required for HTTP directories)")
                .env("BACKSTAGE_USER_POOL_ID"),
        )
        .arg(
            Arg::new(ARG_APP_CLIENT_ID)
                .long("app-client-id")
                .help("Directory app client id used for password logins (required for HTTP directories)")
                .env("BACKSTAGE_APP_CLIENT_ID"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub target: DirectoryTarget,
    pub user_pool_id: Option<String>,
    pub app_client_id: Option<String>,
}

impl Options {
    /// Parse directory arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or an HTTP directory lacks its pool or client id.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let url = matches
            .get_one::<String>(ARG_DIRECTORY_URL)
            .map_or("memory://", String::as_str);
        let target = DirectoryTarget::parse(url).context("invalid --directory-url")?;

        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let user_pool_id = get_non_empty(ARG_USER_POOL_ID);
        let app_client_id = get_non_empty(ARG_APP_CLIENT_ID);

        if matches!(target, DirectoryTarget::Http { .. }) {
            if user_pool_id.is_none() {
                bail!("missing required argument: --{ARG_USER_POOL_ID} (required for HTTP directories)");
            }
            if app_client_id.is_none() {
                bail!("missing required argument: --{ARG_APP_CLIENT_ID} (required for HTTP directories)");
            }
        }

        Ok(Self {
            target,
            user_pool_id,
            app_client_id,
        })
    }
}
