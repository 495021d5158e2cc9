//! Map validated CLI matches to an [`Action`] carrying fully resolved [`Settings`].
//!
//! Production-like profiles are checked here so a misconfigured deployment
//! fails before any backend is contacted.

use crate::auth::Profile;
use crate::cli::actions::{Action, Settings};
use crate::cli::commands::{self, auth, directory, mail, store};
use crate::store::StoreTarget;
use anyhow::{Result, anyhow, bail};
use tracing::warn;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if arguments are missing or inconsistent with the profile.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let settings = settings(matches)?;

    Ok(match matches.subcommand_name() {
        None | Some(commands::CMD_SERVE) => Action::Server(settings),
        Some(commands::CMD_SETUP) => Action::Setup(settings),
        Some(commands::CMD_RECREATE_DB) => Action::RecreateDb(settings),
        Some(other) => bail!("unknown command: {other}"),
    })
}

fn settings(matches: &clap::ArgMatches) -> Result<Settings> {
    let port = matches.get_one::<u16>(commands::ARG_PORT).copied().unwrap_or(8080);
    let profile: Profile = matches
        .get_one::<String>(commands::ARG_PROFILE)
        .map_or(Ok(Profile::default()), |value| value.parse())
        .map_err(|err: String| anyhow!(err))?;

    let directory_opts = directory::Options::parse(matches)?;
    let store_opts = store::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches)?;
    let mail = mail::parse(matches);

    let store = match store_opts.target {
        Some(target) => target,
        None if profile.is_production_like() => {
            bail!("missing required argument: --{} in the {profile} profile", store::ARG_DSN)
        }
        None => {
            warn!("No DSN configured, falling back to the in-memory store");
            StoreTarget::Memory
        }
    };

    if profile.is_production_like() {
        if auth_opts.secret_key.is_none() {
            bail!(
                "missing required argument: --{} in the {profile} profile",
                auth::ARG_SECRET_KEY
            );
        }
        if matches!(store, StoreTarget::Memory) {
            bail!("the in-memory store is not allowed in the {profile} profile");
        }
        if directory_opts.target.is_memory() {
            bail!("the in-memory directory is not allowed in the {profile} profile");
        }
    }

    Ok(Settings {
        profile,
        port,
        directory: directory_opts.target,
        user_pool_id: directory_opts.user_pool_id,
        app_client_id: directory_opts.app_client_id,
        store,
        secret_key: auth_opts.secret_key,
        admin_email: auth_opts.admin_email,
        admin_password: auth_opts.admin_password,
        frontend_base_url: auth_opts.frontend_base_url,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        confirm_token_ttl_seconds: auth_opts.confirm_token_ttl_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        email_change_token_ttl_seconds: auth_opts.email_change_token_ttl_seconds,
        mail,
    })
}
