use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::auth::DEFAULT_ADMIN_EMAIL;

pub const ARG_SECRET_KEY: &str = "secret-key";
pub const ARG_ADMIN_EMAIL: &str = "admin-email";
pub const ARG_ADMIN_PASSWORD: &str = "admin-password";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_CONFIRM_TOKEN_TTL_SECONDS: &str = "confirm-token-ttl-seconds";
pub const ARG_RESET_TOKEN_TTL_SECONDS: &str = "reset-token-ttl-seconds";
pub const ARG_EMAIL_CHANGE_TOKEN_TTL_SECONDS: &str = "email-change-token-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_secret_args(command);
    with_ttl_args(command)
}

fn with_secret_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SECRET_KEY)
                .long("secret-key")
                .help("Key used to sign account workflow tokens")
                .env("BACKSTAGE_SECRET_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_EMAIL)
                .long("admin-email")
                .help("Email of the bootstrap administrator")
                .env("BACKSTAGE_ADMIN_EMAIL")
                .default_value(DEFAULT_ADMIN_EMAIL),
        )
        .arg(
            Arg::new(ARG_ADMIN_PASSWORD)
                .long("admin-password")
                .help("Initial password of the bootstrap administrator (setup only)")
                .env("BACKSTAGE_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long("frontend-base-url")
                .help("Frontend base URL used for emailed links and CORS")
                .env("BACKSTAGE_FRONTEND_BASE_URL")
                .default_value("http://localhost:8080"),
        )
}

fn with_ttl_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long("session-ttl-seconds")
                .help("Session lifetime in seconds")
                .env("BACKSTAGE_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CONFIRM_TOKEN_TTL_SECONDS)
                .long("confirm-token-ttl-seconds")
                .help("Invitation and confirmation token TTL in seconds")
                .env("BACKSTAGE_CONFIRM_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RESET_TOKEN_TTL_SECONDS)
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("BACKSTAGE_RESET_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_EMAIL_CHANGE_TOKEN_TTL_SECONDS)
                .long("email-change-token-ttl-seconds")
                .help("Email change token TTL in seconds")
                .env("BACKSTAGE_EMAIL_CHANGE_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub secret_key: Option<SecretString>,
    pub admin_email: String,
    pub admin_password: Option<SecretString>,
    pub frontend_base_url: String,
    pub session_ttl_seconds: i64,
    pub confirm_token_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub email_change_token_ttl_seconds: i64,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the frontend URL is not an absolute http(s) URL.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = |id: &str| {
            matches
                .get_one::<String>(id)
                .filter(|v| !v.is_empty())
                .map(|v| SecretString::from(v.clone()))
        };
        let ttl = |id: &str, default: i64| matches.get_one::<i64>(id).copied().unwrap_or(default);

        let frontend_base_url = matches
            .get_one::<String>(ARG_FRONTEND_BASE_URL)
            .map_or("http://localhost:8080", String::as_str)
            .trim_end_matches('/')
            .to_string();
        let parsed = url::Url::parse(&frontend_base_url)
            .map_err(|err| anyhow::anyhow!("invalid --{ARG_FRONTEND_BASE_URL}: {err}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("invalid --{ARG_FRONTEND_BASE_URL}: expected http(s)://");
        }

        Ok(Self {
            secret_key: secret(ARG_SECRET_KEY),
            admin_email: matches
                .get_one::<String>(ARG_ADMIN_EMAIL)
                .map_or(DEFAULT_ADMIN_EMAIL, String::as_str)
                .trim()
                .to_lowercase(),
            admin_password: secret(ARG_ADMIN_PASSWORD),
            frontend_base_url,
            session_ttl_seconds: ttl(ARG_SESSION_TTL_SECONDS, 43_200),
            confirm_token_ttl_seconds: ttl(ARG_CONFIRM_TOKEN_TTL_SECONDS, 604_800),
            reset_token_ttl_seconds: ttl(ARG_RESET_TOKEN_TTL_SECONDS, 3_600),
            email_change_token_ttl_seconds: ttl(ARG_EMAIL_CHANGE_TOKEN_TTL_SECONDS, 3_600),
        })
    }
}
