//! Postgres backend — the `kv_entries` table (see `src/db/migrations`).

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{KvBackend, StorageError};

pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvBackend for PgBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_entries (key, value) VALUES ($1, $2)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // left() avoids escaping LIKE metacharacters that appear in keys.
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT key FROM kv_entries WHERE left(key, char_length($1)) = $1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}
