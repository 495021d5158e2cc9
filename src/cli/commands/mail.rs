use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

use crate::notify::MailerConfig;

pub const ARG_MAIL_SUBJECT_PREFIX: &str = "mail-subject-prefix";
pub const ARG_MAIL_MAX_ATTEMPTS: &str = "mail-max-attempts";
pub const ARG_MAIL_BACKOFF_BASE_SECONDS: &str = "mail-backoff-base-seconds";
pub const ARG_MAIL_BACKOFF_MAX_SECONDS: &str = "mail-backoff-max-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_SUBJECT_PREFIX)
                .long("mail-subject-prefix")
                .help("Prefix prepended to every outgoing email subject")
                .env("BACKSTAGE_MAIL_SUBJECT_PREFIX")
                .default_value("[Backstage]"),
        )
        .arg(
            Arg::new(ARG_MAIL_MAX_ATTEMPTS)
                .long("mail-max-attempts")
                .help("Delivery attempts before an email is dropped")
                .env("BACKSTAGE_MAIL_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_MAIL_BACKOFF_BASE_SECONDS)
                .long("mail-backoff-base-seconds")
                .help("Base delay for email retry backoff")
                .env("BACKSTAGE_MAIL_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MAIL_BACKOFF_MAX_SECONDS)
                .long("mail-backoff-max-seconds")
                .help("Max delay for email retry backoff")
                .env("BACKSTAGE_MAIL_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[must_use]
pub fn parse(matches: &ArgMatches) -> MailerConfig {
    let defaults = MailerConfig::new();
    let seconds = |id: &str, default: Duration| {
        matches
            .get_one::<u64>(id)
            .copied()
            .unwrap_or_else(|| default.as_secs())
    };

    MailerConfig::new()
        .with_subject_prefix(
            matches
                .get_one::<String>(ARG_MAIL_SUBJECT_PREFIX)
                .cloned()
                .unwrap_or_default(),
        )
        .with_max_attempts(
            matches
                .get_one::<u32>(ARG_MAIL_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(defaults.max_attempts()),
        )
        .with_backoff_base_seconds(seconds(ARG_MAIL_BACKOFF_BASE_SECONDS, defaults.backoff_base()))
        .with_backoff_max_seconds(seconds(ARG_MAIL_BACKOFF_MAX_SECONDS, defaults.backoff_max()))
        .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        temp_env::with_vars(
            [
                ("BACKSTAGE_MAIL_SUBJECT_PREFIX", None::<&str>),
                ("BACKSTAGE_MAIL_MAX_ATTEMPTS", None::<&str>),
                ("BACKSTAGE_MAIL_BACKOFF_BASE_SECONDS", None::<&str>),
                ("BACKSTAGE_MAIL_BACKOFF_MAX_SECONDS", None::<&str>),
            ],
            || {
                let matches = with_args(Command::new("backstage")).get_matches_from(["backstage"]);
                let config = parse(&matches);
                assert_eq!(config.subject_prefix(), "[Backstage]");
                assert_eq!(config.max_attempts(), 5);
                assert_eq!(config.backoff_base(), Duration::from_secs(5));
                assert_eq!(config.backoff_max(), Duration::from_secs(300));
            },
        );
    }

    #[test]
    fn flags_override() {
        let matches = with_args(Command::new("backstage")).get_matches_from([
            "backstage",
            "--mail-subject-prefix",
            "[Ops]",
            "--mail-max-attempts",
            "2",
        ]);
        let config = parse(&matches);
        assert_eq!(config.subject_prefix(), "[Ops]");
        assert_eq!(config.max_attempts(), 2);
    }
}
