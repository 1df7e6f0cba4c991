//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! Only the Postgres storage backend uses this module: it creates the SQLx
//! pool and applies the `kv_entries` schema before any session is hydrated.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, crate::storage::StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}
