//! Session store — session records, get-or-create, mutation and deletion.
//!
//! DESIGN
//! ======
//! Every stored session is hydrated into an in-memory index when the store
//! opens. Reads come from the index; writes go to the backend first and
//! reach the index only once the backend accepted them, so a failed write
//! leaves both in their previous state.
//!
//! CONCURRENCY
//! ===========
//! Load-modify-persist runs under the session key's lock. Operations that
//! touch several records (linking a new session with its partner, deleting
//! a linked session) hold every affected key's lock, acquired in lexical
//! order by `KeyLocks`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::SessionError;
use crate::locks::{KeyGuard, KeyLocks};
use crate::services::{identity, partner};
use crate::state::{AppState, Session, now_ms};
use crate::storage::{KvBackend, StorageError};

const SESSION_PREFIX: &str = "session/";

fn record_key(session_key: &str) -> String {
    format!("{SESSION_PREFIX}{session_key}")
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KvBackend>,
    index: Arc<RwLock<HashMap<String, Session>>>,
    locks: KeyLocks,
}

impl SessionStore {
    /// Open the store and hydrate every session record from `backend`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing or reading fails, or a record does
    /// not parse as a session.
    pub async fn open(backend: Arc<dyn KvBackend>) -> Result<Self, StorageError> {
        let mut index = HashMap::new();
        for record in backend.list(SESSION_PREFIX).await? {
            let Some(value) = backend.read(&record).await? else {
                continue;
            };
            let session: Session = serde_json::from_value(value)?;
            index.insert(session.session_key.clone(), session);
        }
        info!(backend = backend.name(), sessions = index.len(), "session store hydrated");
        Ok(Self { backend, index: Arc::new(RwLock::new(index)), locks: KeyLocks::new() })
    }

    /// Pure lookup.
    pub async fn find(&self, session_key: &str) -> Option<Session> {
        self.index.read().await.get(session_key).cloned()
    }

    /// Sessions sorted by key, optionally restricted to one group (any case).
    pub async fn list(&self, group: Option<&str>) -> Vec<Session> {
        let group = group.map(|g| g.trim().to_uppercase());
        let index = self.index.read().await;
        let mut sessions: Vec<Session> = index
            .values()
            .filter(|s| group.as_deref().is_none_or(|g| s.group == g))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        sessions
    }

    /// Lock every key in `keys` (lexical order).
    pub(crate) async fn lock<I, S>(&self, keys: I) -> KeyGuard
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.locks.lock_many(keys).await
    }

    /// Persist a session. Caller must hold its key lock.
    pub(crate) async fn put(&self, session: &Session) -> Result<(), StorageError> {
        let value = serde_json::to_value(session)?;
        if let Err(e) = self
            .backend
            .write(&record_key(&session.session_key), &value)
            .await
        {
            error!(error = %e, session_key = %session.session_key, "session write failed");
            return Err(e);
        }
        self.index
            .write()
            .await
            .insert(session.session_key.clone(), session.clone());
        Ok(())
    }

    /// Remove a session. Caller must hold its key lock.
    pub(crate) async fn remove(&self, session_key: &str) -> Result<Option<Session>, StorageError> {
        if self.find(session_key).await.is_none() {
            return Ok(None);
        }
        if let Err(e) = self.backend.delete(&record_key(session_key)).await {
            error!(error = %e, %session_key, "session delete failed");
            return Err(e);
        }
        Ok(self.index.write().await.remove(session_key))
    }

    /// Load, transform, stamp `updated_at`, persist. Atomic with respect to
    /// other mutations of the same key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown key, whatever `f` returns, or a
    /// storage error if the write fails (the stored record is unchanged).
    pub async fn mutate<F>(&self, session_key: &str, f: F) -> Result<Session, SessionError>
    where
        F: FnOnce(&mut Session) -> Result<(), SessionError>,
    {
        let _guard = self.lock([session_key]).await;
        let mut session = self
            .find(session_key)
            .await
            .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))?;
        f(&mut session)?;
        session.updated_at = now_ms();
        self.put(&session).await?;
        Ok(session)
    }
}

// =============================================================================
// ENSURE
// =============================================================================

/// Update the display name if a non-blank, different one was given.
pub(crate) fn apply_name(session: &mut Session, participant_name: &str) -> bool {
    let name = participant_name.trim();
    if name.is_empty() || name == session.participant_name {
        return false;
    }
    name.clone_into(&mut session.participant_name);
    true
}

/// Display name for a new session; falls back to the participant id.
pub(crate) fn display_name(participant_name: &str, participant_id: &str) -> String {
    let name = participant_name.trim();
    if name.is_empty() { participant_id.to_owned() } else { name.to_owned() }
}

/// Idempotent get-or-create.
///
/// First call for a key consults the partner matcher and creates the
/// session either linked with its partner or in a solo room. The roster is
/// read for peer-enabled groups only; a pending hint naming this participant
/// is honored in every group. Later calls update the display name and
/// backfill partner fields that are still missing.
///
/// A solo room is provisional: a backfilled link moves the session into the
/// shared pair room. An existing pair room is never replaced.
///
/// # Errors
///
/// Returns `Validation` for an empty group or id, or a storage error.
pub async fn ensure(
    state: &AppState,
    group: &str,
    participant_id: &str,
    participant_name: &str,
) -> Result<Session, SessionError> {
    let key = identity::session_key(group, participant_id)?;
    let group = identity::normalize_group(group)?;
    let participant_id = participant_id.trim();

    let needs_partner = state
        .sessions
        .find(&key)
        .await
        .is_none_or(|s| s.partner_participant_id.is_none());

    let discovered = if needs_partner {
        let use_roster = state.config.is_peer_group(&group);
        partner::discover(state, &group, participant_id, participant_name, use_roster).await
    } else {
        None
    };

    match discovered {
        Some(found) => partner::ensure_linked(state, &key, &group, participant_id, participant_name, &found).await,
        None => ensure_solo(state, &key, &group, participant_id, participant_name).await,
    }
}

async fn ensure_solo(
    state: &AppState,
    key: &str,
    group: &str,
    participant_id: &str,
    participant_name: &str,
) -> Result<Session, SessionError> {
    let _guard = state.sessions.lock([key]).await;

    if let Some(mut existing) = state.sessions.find(key).await {
        if apply_name(&mut existing, participant_name) {
            existing.updated_at = now_ms();
            state.sessions.put(&existing).await?;
        }
        return Ok(existing);
    }

    let room_id = identity::solo_room_id(group, participant_id)?;
    let session = Session::new(
        key.to_owned(),
        group.to_owned(),
        participant_id.to_owned(),
        display_name(participant_name, participant_id),
        room_id,
        now_ms(),
    );
    state.sessions.put(&session).await?;
    info!(session_key = %key, room_id = %session.room_id, "session created");
    Ok(session)
}

// =============================================================================
// DELETE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted_count: usize,
}

/// Remove sessions and everything that referenced them: transcripts
/// (`ai:<key>`, `peer:<room>`), partner links held by other sessions, and
/// presence entries. Unknown keys are ignored.
///
/// Each session record is deleted last, after its transcripts are purged
/// and its links dissolved, so a failed call can be retried as-is.
///
/// # Errors
///
/// Returns a storage error if a purge, unlink write, or delete fails.
pub async fn delete(state: &AppState, session_keys: &BTreeSet<String>) -> Result<DeleteReport, SessionError> {
    let mut deleted = 0;
    for key in session_keys {
        let Some(_guard) = partner::lock_linked(state, key).await else {
            continue;
        };
        let Some(session) = state.sessions.find(key).await else {
            continue;
        };

        state
            .transcripts
            .purge(&identity::ai_chat_id(&session.session_key))
            .await?;
        state
            .transcripts
            .purge(&identity::peer_chat_id(&session.room_id))
            .await?;
        partner::detach(state, &session).await?;
        if state.sessions.remove(key).await?.is_some() {
            deleted += 1;
        }
        state
            .presence
            .leave(&session.room_id, &session.participant_id);
    }

    info!(requested = session_keys.len(), deleted, "sessions deleted");
    Ok(DeleteReport { deleted_count: deleted })
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
