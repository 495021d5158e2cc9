//! Auth configuration and runtime profile.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{Error, Result};

pub const DEFAULT_ADMIN_EMAIL: &str = "flask-base-administrator@example.com";
const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_CONFIRM_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_EMAIL_CHANGE_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEVELOPMENT_SECRET_KEY: &str = "backstage-development-secret-key";
const MIN_SECRET_KEY_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Testing,
    Production,
    Unix,
}

impl Profile {
    pub const VARIANTS: [&'static str; 4] = ["development", "testing", "production", "unix"];

    /// Production-like profiles refuse to start without explicit secrets.
    #[must_use]
    pub fn is_production_like(self) -> bool {
        matches!(self, Self::Production | Self::Unix)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Production => "production",
            Self::Unix => "unix",
        }
    }

    /// Resolve the token signing key for this profile.
    ///
    /// # Errors
    /// Returns `Error::Configuration` when a production-like profile has no
    /// key, or when a supplied key is too short.
    pub fn signing_key(self, configured: Option<SecretString>) -> Result<SecretString> {
        match configured {
            Some(key) if key.expose_secret().trim().len() >= MIN_SECRET_KEY_LEN => Ok(key),
            Some(_) => Err(Error::Configuration(format!(
                "BACKSTAGE_SECRET_KEY must be at least {MIN_SECRET_KEY_LEN} characters"
            ))),
            None if self.is_production_like() => Err(Error::Configuration(format!(
                "BACKSTAGE_SECRET_KEY is required in the {self} profile"
            ))),
            None => {
                warn!(profile = %self, "BACKSTAGE_SECRET_KEY not set, using the development key");
                Ok(SecretString::from(DEVELOPMENT_SECRET_KEY))
            }
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "production" | "prod" => Ok(Self::Production),
            "unix" => Ok(Self::Unix),
            other => Err(format!("unknown profile: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    admin_email: String,
    frontend_base_url: String,
    session_ttl_seconds: i64,
    confirm_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    email_change_token_ttl_seconds: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080".to_string())
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            admin_email: DEFAULT_ADMIN_EMAIL.to_string(),
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            confirm_token_ttl_seconds: DEFAULT_CONFIRM_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            email_change_token_ttl_seconds: DEFAULT_EMAIL_CHANGE_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_admin_email(mut self, email: String) -> Self {
        self.admin_email = email;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_confirm_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.confirm_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_change_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_change_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn admin_email(&self) -> &str {
        &self.admin_email
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn confirm_token_ttl_seconds(&self) -> i64 {
        self.confirm_token_ttl_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn email_change_token_ttl_seconds(&self) -> i64 {
        self.email_change_token_ttl_seconds
    }

    /// Cookies are marked `Secure` when the frontend is served over https.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}
