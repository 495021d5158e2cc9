//! Editable content areas stored in the `editors` table.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::Result;
use crate::store::{DocumentStore, Table};

/// Value stored for a content area the first time it is read.
pub const DEFAULT_CONTENT: &str = " ";

#[derive(Clone)]
pub struct ContentRepository {
    store: Arc<dyn DocumentStore>,
}

impl ContentRepository {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Read a content area, creating it with [`DEFAULT_CONTENT`] when absent.
    /// A value written concurrently is returned, never replaced.
    ///
    /// # Errors
    /// Returns `Error::Store` on store failures.
    #[instrument(skip(self))]
    pub async fn get_or_default(&self, name: &str) -> Result<String> {
        if let Some(value) = self.store.get(Table::Editors, name).await? {
            return Ok(value);
        }
        debug!("Creating content area with default value");
        Ok(self
            .store
            .insert_if_absent(Table::Editors, name, DEFAULT_CONTENT)
            .await?)
    }

    /// Read a content area without creating it.
    ///
    /// # Errors
    /// Returns `Error::Store` on store failures.
    pub async fn read(&self, name: &str) -> Result<String> {
        Ok(self
            .store
            .get(Table::Editors, name)
            .await?
            .unwrap_or_else(|| DEFAULT_CONTENT.to_string()))
    }

    /// Overwrite a content area.
    ///
    /// # Errors
    /// Returns `Error::Store` on store failures.
    #[instrument(skip(self, value))]
    pub async fn update(&self, name: &str, value: &str) -> Result<()> {
        self.store.put(Table::Editors, name, value).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDocumentStore, StoreError};
    use async_trait::async_trait;

    /// Lands an edit between a missed read and the caller's next step.
    struct EditOnMiss(MemoryDocumentStore);

    #[async_trait]
    impl DocumentStore for EditOnMiss {
        async fn get(&self, table: Table, key: &str) -> Result<Option<String>, StoreError> {
            let found = self.0.get(table, key).await?;
            if found.is_none() {
                self.0.put(table, key, "<p>admin edit</p>").await?;
            }
            Ok(found)
        }
        async fn put(&self, table: Table, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.put(table, key, value).await
        }
        async fn insert_if_absent(
            &self,
            table: Table,
            key: &str,
            value: &str,
        ) -> Result<String, StoreError> {
            self.0.insert_if_absent(table, key, value).await
        }
        async fn exists(&self, table: Table, key: &str) -> Result<bool, StoreError> {
            self.0.exists(table, key).await
        }
        async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
            self.0.delete(table, key).await
        }
        async fn create_table(&self, table: Table) -> Result<(), StoreError> {
            self.0.create_table(table).await
        }
        async fn drop_table(&self, table: Table) -> Result<(), StoreError> {
            self.0.drop_table(table).await
        }
        async fn table_exists(&self, table: Table) -> Result<bool, StoreError> {
            self.0.table_exists(table).await
        }
        async fn ping(&self) -> Result<(), StoreError> {
            self.0.ping().await
        }
    }

    #[tokio::test]
    async fn concurrent_edit_survives_first_read() -> Result<()> {
        let store = Arc::new(EditOnMiss(MemoryDocumentStore::new()));
        let content = ContentRepository::new(store.clone());
        assert_eq!(content.get_or_default("about").await?, "<p>admin edit</p>");
        assert_eq!(
            store.0.get(Table::Editors, "about").await?.as_deref(),
            Some("<p>admin edit</p>")
        );
        Ok(())
    }

    #[tokio::test]
    async fn read_does_not_persist() -> Result<()> {
        let store = Arc::new(MemoryDocumentStore::new());
        let content = ContentRepository::new(store.clone());
        assert_eq!(content.read("about").await?, DEFAULT_CONTENT);
        assert!(!store.exists(Table::Editors, "about").await?);
        content.update("about", "<p>Hi</p>").await?;
        assert_eq!(content.read("about").await?, "<p>Hi</p>");
        Ok(())
    }

    #[tokio::test]
    async fn first_read_persists_default() -> Result<()> {
        let store = Arc::new(MemoryDocumentStore::new());
        let content = ContentRepository::new(store.clone());
        assert_eq!(content.get_or_default("about").await?, " ");
        assert!(store.exists(Table::Editors, "about").await?);
        Ok(())
    }

    #[tokio::test]
    async fn update_overwrites() -> Result<()> {
        let content = ContentRepository::new(Arc::new(MemoryDocumentStore::new()));
        content.update("about", "<p>Hello</p>").await?;
        content.update("about", "<p>Updated</p>").await?;
        assert_eq!(content.get_or_default("about").await?, "<p>Updated</p>");
        Ok(())
    }
}
