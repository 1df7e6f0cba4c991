//! Shared application state and the session data model.
//!
//! DESIGN
//! ======
//! `AppState` is constructed once per process and handed to every service
//! function. It owns the session store, the presence tracker and the
//! collaborator handles (roster, transcripts). Nothing lives in ambient
//! module state, so tests build a fresh `AppState` per case.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::CoreConfig;
use crate::roster::Roster;
use crate::services::presence::PresenceTracker;
use crate::services::session::SessionStore;
use crate::services::transcript::{KvTranscripts, TranscriptStore};
use crate::storage::{KvBackend, StorageError};

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// STAGE
// =============================================================================

/// Ordinal phase of the writing workflow.
///
/// Serialized as its integer so stored records read `"stage": 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Stage {
    Prewriting = 1,
    Draft = 2,
    PeerNotes = 3,
    Final = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stage {0} is out of range 1..=4")]
pub struct InvalidStage(pub i64);

impl Stage {
    /// Terminal stage number.
    pub const MAX: u8 = 4;

    #[must_use]
    pub fn number(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Prewriting => "prewriting",
            Self::Draft => "draft",
            Self::PeerNotes => "peer notes",
            Self::Final => "final",
        }
    }
}

impl TryFrom<u8> for Stage {
    type Error = InvalidStage;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Prewriting),
            2 => Ok(Self::Draft),
            3 => Ok(Self::PeerNotes),
            4 => Ok(Self::Final),
            other => Err(InvalidStage(i64::from(other))),
        }
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage.number()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.label())
    }
}

// =============================================================================
// CONTENT BLOCK
// =============================================================================

/// One piece of written content plus the time it was last written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    pub text: String,
    /// Milliseconds since Unix epoch. `None` until the text is first written.
    pub timestamp: Option<i64>,
}

impl ContentBlock {
    /// Whitespace-only text counts as empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub(crate) fn write(&mut self, text: &str, now: i64) {
        text.clone_into(&mut self.text);
        self.timestamp = Some(now);
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One participant's progress record. Stored as JSON under `session/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_key: String,
    pub group: String,
    pub participant_id: String,
    pub participant_name: String,
    pub room_id: String,
    pub stage: Stage,
    pub prewriting: ContentBlock,
    pub draft: ContentBlock,
    pub notes: ContentBlock,
    #[serde(rename = "final")]
    pub final_draft: ContentBlock,
    pub partner_participant_id: Option<String>,
    pub partner_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Session {
    #[must_use]
    pub fn new(
        session_key: String,
        group: String,
        participant_id: String,
        participant_name: String,
        room_id: String,
        now: i64,
    ) -> Self {
        Self {
            session_key,
            group,
            participant_id,
            participant_name,
            room_id,
            stage: Stage::Prewriting,
            prewriting: ContentBlock::default(),
            draft: ContentBlock::default(),
            notes: ContentBlock::default(),
            final_draft: ContentBlock::default(),
            partner_participant_id: None,
            partner_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Session key of the referenced partner, if any.
    #[must_use]
    pub fn partner_key(&self) -> Option<String> {
        let partner_id = self.partner_participant_id.as_deref()?;
        crate::services::identity::session_key(&self.group, partner_id).ok()
    }

    /// True when this session names `other` as partner.
    #[must_use]
    pub fn points_at(&self, other: &Session) -> bool {
        self.group == other.group && self.partner_participant_id.as_deref() == Some(other.participant_id.as_str())
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is cheap: every field is Arc-backed.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CoreConfig>,
    pub sessions: SessionStore,
    pub presence: PresenceTracker,
    pub roster: Arc<dyn Roster>,
    pub transcripts: Arc<dyn TranscriptStore>,
}

impl AppState {
    /// Open the session store on `backend` (hydrating every stored session)
    /// and wire up presence and transcripts.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the backend cannot be listed or a stored
    /// record fails to parse.
    pub async fn open(
        config: CoreConfig,
        backend: Arc<dyn KvBackend>,
        roster: Arc<dyn Roster>,
    ) -> Result<Self, StorageError> {
        let sessions = SessionStore::open(backend.clone()).await?;
        let presence = PresenceTracker::new(config.presence_ttl_ms);
        let transcripts: Arc<dyn TranscriptStore> = Arc::new(KvTranscripts::new(backend));
        Ok(Self { config: Arc::new(config), sessions, presence, roster, transcripts })
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
