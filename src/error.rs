//! Crate-level error taxonomy.
//!
//! Expected failures never carry their root cause across the adapter boundary:
//! a directory miss is `NotFound`, and a failed login or token redemption is
//! `Rejected` whether the credentials were wrong or the directory was down.
//! The finer-grained cause is logged where it happens.

use thiserror::Error;

use crate::store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("principal not found")]
    NotFound,
    #[error("request rejected")]
    Rejected,
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("document store error: {0}")]
    Store(#[from] StoreError),
    #[error("token encoding failed: {0}")]
    Token(String),
}

impl Error {
    /// Whether this is one of the expected per-request outcomes.
    #[must_use]
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::NotFound | Self::Rejected)
    }
}
