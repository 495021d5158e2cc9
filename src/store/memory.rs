use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{DocumentStore, StoreError, Table};

/// Store backed by process memory. Both tables exist on construction.
pub struct MemoryDocumentStore {
    tables: RwLock<HashMap<Table, BTreeMap<String, String>>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        let tables = Table::ALL
            .into_iter()
            .map(|table| (table, BTreeMap::new()))
            .collect();
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// A store with no tables, as before `setup` runs.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self, table: Table) -> usize {
        self.tables
            .read()
            .await
            .get(&table)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<String>, StoreError> {
        let tables = self.tables.read().await;
        let records = tables.get(&table).ok_or(StoreError::MissingTable(table))?;
        Ok(records.get(key).cloned())
    }

    async fn put(&self, table: Table, key: &str, value: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let records = tables
            .get_mut(&table)
            .ok_or(StoreError::MissingTable(table))?;
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        table: Table,
        key: &str,
        value: &str,
    ) -> Result<String, StoreError> {
        let mut tables = self.tables.write().await;
        let records = tables
            .get_mut(&table)
            .ok_or(StoreError::MissingTable(table))?;
        Ok(records
            .entry(key.to_string())
            .or_insert_with(|| value.to_string())
            .clone())
    }

    async fn exists(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        let records = tables.get(&table).ok_or(StoreError::MissingTable(table))?;
        Ok(records.contains_key(key))
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let records = tables
            .get_mut(&table)
            .ok_or(StoreError::MissingTable(table))?;
        Ok(records.remove(key).is_some())
    }

    async fn create_table(&self, table: Table) -> Result<(), StoreError> {
        self.tables.write().await.entry(table).or_default();
        Ok(())
    }

    async fn drop_table(&self, table: Table) -> Result<(), StoreError> {
        self.tables.write().await.remove(&table);
        Ok(())
    }

    async fn table_exists(&self, table: Table) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.contains_key(&table))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
