//! # Backstage (administrative backend)
//!
//! `backstage` serves a small administrative application: inviting users,
//! assigning them a role and editing static content areas. Identity lives in an
//! external user directory and records live in a keyed document store; this
//! crate is the glue between the two and the HTTP layer.
//!
//! ## Principals
//!
//! Each request resolves to exactly one [`auth::CurrentPrincipal`]: either the
//! anonymous sentinel or an authenticated [`auth::Principal`] carrying a single
//! group label (`administrator` or `general`). The directory stays
//! authoritative; principals are rebuilt per request and never cached.
//!
//! ## Sessions
//!
//! A successful credential login stores the directory's authentication result
//! in the `session` table under the SHA-256 digest of a random session token.
//! The raw token is handed to the client as an `HttpOnly` cookie (or used as a
//! bearer token) and is never stored.
//!
//! ## Workflow tokens
//!
//! Invitations, password resets and email changes use HS256-signed,
//! self-contained tokens. Any redemption failure (bad signature, expiry, wrong
//! kind, wrong subject) is reported as the same generic rejection.

pub mod api;
pub mod auth;
pub mod cli;
pub mod content;
pub mod directory;
pub mod error;
pub mod notify;
pub mod store;

pub use error::{Error, Result};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
