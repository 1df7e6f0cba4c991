//! Disk backend — one JSON file per key under a root directory.
//!
//! DESIGN
//! ======
//! Keys are percent-encoded into flat file names (`session/A::S1` becomes
//! `session%2FA%3A%3AS1.json`) so listing can decode them back. Writes go
//! to a uniquely named temp file in the same directory, are fsynced, then
//! renamed over the target; readers never observe a half-written record.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{KvBackend, StorageError};

const RECORD_EXT: &str = ".json";

pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    /// Open (creating if needed) a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(format!("{}{RECORD_EXT}", encode_key(key))))
    }
}

fn is_plain(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_')
}

pub(crate) fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if is_plain(b) {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

pub(crate) fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[async_trait]
impl KvBackend for DiskBackend {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let body = serde_json::to_vec_pretty(value)?;
        let tmp_path = self.root.join(format!(".{}.tmp", Uuid::new_v4()));

        let result = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = name.strip_suffix(RECORD_EXT) else {
                continue;
            };
            if let Some(key) = decode_key(stem).filter(|k| k.starts_with(prefix)) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
#[path = "disk_test.rs"]
mod tests;
