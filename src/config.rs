//! Core configuration parsed from environment variables.
//!
//! Optional:
//! - `PEER_GROUPS`: comma-separated peer-enabled groups (default `A,B`)
//! - `PRESENCE_TTL_MS`: presence TTL (default 20000)
//! - `JUMP_STAGE_HEADROOM`: slots above the final stage admitted by the jump clamp (default 1)
//! - `STORAGE_BACKEND`: `disk` (default), `memory` or `postgres`
//! - `DATA_DIR`: disk backend root (default `./data`)
//! - `DATABASE_URL`: required when `STORAGE_BACKEND=postgres`
//! - `DB_MAX_CONNECTIONS`: pool size (default 5)
//! - `ROSTER_PATH`: roster JSON file

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;

use crate::services::presence::DEFAULT_PRESENCE_TTL_MS;

pub const DEFAULT_PEER_GROUPS: &str = "A,B";
pub const DEFAULT_JUMP_STAGE_HEADROOM: u8 = 1;
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown STORAGE_BACKEND: {0} (expected 'disk', 'memory' or 'postgres')")]
    UnknownBackend(String),
    #[error("DATABASE_URL is required when STORAGE_BACKEND=postgres")]
    MissingDatabaseUrl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Disk { data_dir: PathBuf },
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub db_max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Canonical (upper-case) groups whose workflow includes the peer-notes stage.
    pub peer_groups: BTreeSet<String>,
    pub presence_ttl_ms: i64,
    pub jump_stage_headroom: u8,
    pub storage: StorageConfig,
    pub roster_path: Option<PathBuf>,
}

impl CoreConfig {
    /// Build typed config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown backend or a postgres backend without URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from any key lookup.
    ///
    /// # Errors
    ///
    /// See [`CoreConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let peer_groups = parse_groups(lookup("PEER_GROUPS").as_deref().unwrap_or(DEFAULT_PEER_GROUPS));
        let presence_ttl_ms = parse_or("PRESENCE_TTL_MS", &lookup, DEFAULT_PRESENCE_TTL_MS);
        let jump_stage_headroom = parse_or("JUMP_STAGE_HEADROOM", &lookup, DEFAULT_JUMP_STAGE_HEADROOM);
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", &lookup, DEFAULT_DB_MAX_CONNECTIONS);

        let kind = match lookup("STORAGE_BACKEND").as_deref().unwrap_or("disk") {
            "memory" => StorageKind::Memory,
            "disk" => StorageKind::Disk {
                data_dir: PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_owned())),
            },
            "postgres" => StorageKind::Postgres {
                database_url: lookup("DATABASE_URL")
                    .filter(|v| !v.trim().is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl)?,
            },
            other => return Err(ConfigError::UnknownBackend(other.to_owned())),
        };

        Ok(Self {
            peer_groups,
            presence_ttl_ms,
            jump_stage_headroom,
            storage: StorageConfig { kind, db_max_connections },
            roster_path: lookup("ROSTER_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        })
    }

    /// Whether `group` (any case) has a peer-notes stage.
    #[must_use]
    pub fn is_peer_group(&self, group: &str) -> bool {
        self.peer_groups.contains(&group.trim().to_uppercase())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            peer_groups: parse_groups(DEFAULT_PEER_GROUPS),
            presence_ttl_ms: DEFAULT_PRESENCE_TTL_MS,
            jump_stage_headroom: DEFAULT_JUMP_STAGE_HEADROOM,
            storage: StorageConfig { kind: StorageKind::Memory, db_max_connections: DEFAULT_DB_MAX_CONNECTIONS },
            roster_path: None,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, lookup: &impl Fn(&str) -> Option<String>, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_groups(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|g| g.trim().to_uppercase())
        .filter(|g| !g.is_empty())
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
