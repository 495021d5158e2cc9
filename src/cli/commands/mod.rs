pub mod auth;
pub mod directory;
pub mod logging;
pub mod mail;
pub mod store;

use clap::{
    Arg, ColorChoice, Command,
    builder::{
        PossibleValuesParser,
        styling::{AnsiColor, Effects, Styles},
    },
};

use crate::auth::Profile;

pub const ARG_PORT: &str = "port";
pub const ARG_PROFILE: &str = "profile";

pub const CMD_SERVE: &str = "serve";
pub const CMD_SETUP: &str = "setup";
pub const CMD_RECREATE_DB: &str = "recreate-db";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("backstage")
        .about("Administrative backend with directory-backed sessions")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand(Command::new(CMD_SERVE).about("Serve the HTTP API (default)"))
        .subcommand(
            Command::new(CMD_SETUP)
                .about("Create tables, the role groups, the bootstrap administrator and seed content"),
        )
        .subcommand(Command::new(CMD_RECREATE_DB).about("Drop and recreate the document store tables"))
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("BACKSTAGE_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_PROFILE)
                .long("profile")
                .help("Runtime profile; production and unix require explicit secrets")
                .env("BACKSTAGE_PROFILE")
                .default_value(Profile::Development.as_str())
                .value_parser(PossibleValuesParser::new(Profile::VARIANTS)),
        );

    let command = directory::with_args(command);
    let command = store::with_args(command);
    let command = auth::with_args(command);
    let command = mail::with_args(command);
    logging::with_args(command)
}
