use async_trait::async_trait;
use sqlx::{Connection, PgPool, Row};
use tracing::{Instrument, info_span, instrument};

use super::{DocumentStore, StoreError, Table};

/// Postgres-backed store. Each table is `(<key column> TEXT PRIMARY KEY, value TEXT)`.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn query_span(operation: &'static str, table: Table) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.sql.table = table.name()
    )
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, table: Table, key: &str) -> Result<Option<String>, StoreError> {
        let query = format!(
            "SELECT value FROM {} WHERE {} = $1",
            table.name(),
            table.key_column()
        );
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", table))
            .await?;
        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn put(&self, table: Table, key: &str, value: &str) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {table} ({key}, value) VALUES ($1, $2) \
             ON CONFLICT ({key}) DO UPDATE SET value = EXCLUDED.value",
            table = table.name(),
            key = table.key_column()
        );
        sqlx::query(&query)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .instrument(query_span("UPSERT", table))
            .await?;
        Ok(())
    }

    async fn insert_if_absent(
        &self,
        table: Table,
        key: &str,
        value: &str,
    ) -> Result<String, StoreError> {
        let query = format!(
            "INSERT INTO {table} ({key}, value) VALUES ($1, $2) ON CONFLICT ({key}) DO NOTHING",
            table = table.name(),
            key = table.key_column()
        );
        sqlx::query(&query)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .instrument(query_span("INSERT", table))
            .await?;
        // A concurrent delete can remove the row again before the re-read.
        Ok(self
            .get(table, key)
            .await?
            .unwrap_or_else(|| value.to_string()))
    }

    async fn exists(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            table.name(),
            table.key_column()
        );
        let row = sqlx::query(&query)
            .bind(key)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", table))
            .await?;
        Ok(row.get::<bool, _>(0))
    }

    async fn delete(&self, table: Table, key: &str) -> Result<bool, StoreError> {
        let query = format!(
            "DELETE FROM {} WHERE {} = $1",
            table.name(),
            table.key_column()
        );
        let result = sqlx::query(&query)
            .bind(key)
            .execute(&self.pool)
            .instrument(query_span("DELETE", table))
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn create_table(&self, table: Table) -> Result<(), StoreError> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, value TEXT NOT NULL)",
            table.name(),
            table.key_column()
        );
        sqlx::query(&query)
            .execute(&self.pool)
            .instrument(query_span("CREATE", table))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_table(&self, table: Table) -> Result<(), StoreError> {
        let query = format!("DROP TABLE IF EXISTS {}", table.name());
        sqlx::query(&query)
            .execute(&self.pool)
            .instrument(query_span("DROP", table))
            .await?;
        Ok(())
    }

    async fn table_exists(&self, table: Table) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
        )
            .bind(table.name())
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", table))
            .await?;
        Ok(row.get::<bool, _>(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }
}
