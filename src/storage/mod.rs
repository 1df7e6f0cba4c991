//! Storage — key/value JSON persistence behind one narrow trait.
//!
//! ARCHITECTURE
//! ============
//! The core never knows which backend it writes to. Session records live
//! under `session/<key>` and transcripts under `transcript/<chat id>`;
//! presence is deliberately never persisted.
//!
//! ERROR HANDLING
//! ==============
//! Backend failures surface as `StorageError` and are never swallowed: a
//! lost write must reach the caller so it can retry the whole request.

pub mod disk;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{StorageConfig, StorageKind};
use crate::error::ErrorCode;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("malformed record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_STORAGE_IO",
            Self::Database(_) | Self::Migrate(_) => "E_DATABASE",
            Self::Serde(_) => "E_STORAGE_CORRUPT",
            Self::InvalidKey(_) => "E_STORAGE_KEY",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Database(_))
    }
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Read/write-by-key JSON store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fetch the value stored under `key`, or `None` if absent.
    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError>;

    /// Remove `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Open the backend selected by configuration.
///
/// # Errors
///
/// Returns an error if the disk root cannot be created or the database
/// connection or migrations fail.
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn KvBackend>, StorageError> {
    let backend: Arc<dyn KvBackend> = match &config.kind {
        StorageKind::Memory => Arc::new(memory::MemoryBackend::new()),
        StorageKind::Disk { data_dir } => Arc::new(disk::DiskBackend::open(data_dir).await?),
        StorageKind::Postgres { database_url } => {
            let pool = crate::db::init_pool(database_url, config.db_max_connections).await?;
            Arc::new(postgres::PgBackend::new(pool))
        }
    };
    info!(backend = backend.name(), "storage backend opened");
    Ok(backend)
}
