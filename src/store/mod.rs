//! Keyed document store.
//!
//! Two flat tables, each mapping a single string key to a text value:
//! `editors` holds editable content and `session` holds session blobs.

mod memory;
mod postgres;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("table {0} does not exist")]
    MissingTable(Table),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Editors,
    Sessions,
}

impl Table {
    pub const ALL: [Self; 2] = [Self::Editors, Self::Sessions];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Editors => "editors",
            Self::Sessions => "session",
        }
    }

    #[must_use]
    pub const fn key_column(self) -> &'static str {
        match self {
            Self::Editors => "editor_name",
            Self::Sessions => "session_id",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, table: Table, key: &str) -> Result<Option<String>, StoreError>;

    /// Create or overwrite the record stored under `key`.
    async fn put(&self, table: Table, key: &str, value: &str) -> Result<(), StoreError>;

    /// Store `value` only when `key` is absent and return whatever is stored
    /// afterwards. An existing record is never overwritten.
    async fn insert_if_absent(
        &self,
        table: Table,
        key: &str,
        value: &str,
    ) -> Result<String, StoreError>;

    async fn exists(&self, table: Table, key: &str) -> Result<bool, StoreError>;

    /// Returns `true` when a record was removed.
    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError>;

    async fn create_table(&self, table: Table) -> Result<(), StoreError>;

    async fn drop_table(&self, table: Table) -> Result<(), StoreError>;

    async fn table_exists(&self, table: Table) -> Result<bool, StoreError>;

    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Postgres { dsn: String },
    Memory,
}

impl StoreTarget {
    /// Parse `BACKSTAGE_DSN` into a Postgres DSN or the in-memory store.
    /// # Errors
    /// Returns an error for any other scheme.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            return Ok(Self::Postgres {
                dsn: trimmed.to_string(),
            });
        }
        if trimmed == "memory://" || trimmed == "memory" {
            return Ok(Self::Memory);
        }
        Err(anyhow::anyhow!(
            "invalid BACKSTAGE_DSN: expected postgres://... or memory://"
        ))
    }
}
