//! Transcripts — per-chat message history on the key/value backend.
//!
//! Two kinds of chat exist: a session's private AI conversation
//! (`ai:<session key>`) and the conversation held in a room
//! (`peer:<room id>`). Each chat is one JSON array stored under
//! `transcript/<chat id>`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::locks::KeyLocks;
use crate::storage::{KvBackend, StorageError};

const TRANSCRIPT_PREFIX: &str = "transcript/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Participant id, or a role such as `assistant`.
    pub from: String,
    pub text: String,
    /// Milliseconds since Unix epoch.
    pub ts: i64,
}

#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, chat_id: &str, message: ChatMessage) -> Result<(), StorageError>;
    async fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>, StorageError>;
    /// Drop a chat. Returns whether anything was stored.
    async fn purge(&self, chat_id: &str) -> Result<bool, StorageError>;
}

pub struct KvTranscripts {
    backend: Arc<dyn KvBackend>,
    locks: KeyLocks,
}

impl KvTranscripts {
    #[must_use]
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend, locks: KeyLocks::new() }
    }

    async fn load(&self, record: &str) -> Result<Vec<ChatMessage>, StorageError> {
        match self.backend.read(record).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }
}

fn record_key(chat_id: &str) -> String {
    format!("{TRANSCRIPT_PREFIX}{chat_id}")
}

#[async_trait]
impl TranscriptStore for KvTranscripts {
    async fn append(&self, chat_id: &str, message: ChatMessage) -> Result<(), StorageError> {
        let record = record_key(chat_id);
        let _guard = self.locks.lock(&record).await;
        let mut messages = self.load(&record).await?;
        messages.push(message);
        self.backend
            .write(&record, &serde_json::to_value(&messages)?)
            .await?;
        debug!(%chat_id, messages = messages.len(), "transcript appended");
        Ok(())
    }

    async fn history(&self, chat_id: &str) -> Result<Vec<ChatMessage>, StorageError> {
        self.load(&record_key(chat_id)).await
    }

    async fn purge(&self, chat_id: &str) -> Result<bool, StorageError> {
        let record = record_key(chat_id);
        let _guard = self.locks.lock(&record).await;
        if self.backend.read(&record).await?.is_none() {
            return Ok(false);
        }
        self.backend.delete(&record).await?;
        debug!(%chat_id, "transcript purged");
        Ok(true)
    }
}
