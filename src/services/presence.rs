//! Presence tracker — ephemeral heartbeat registry.
//!
//! DESIGN
//! ======
//! `(room_id, participant_id) -> last heartbeat (ms)` behind one coarse
//! mutex. Entries are never swept; staleness is computed at read time
//! against the TTL. Presence is advisory and not persisted, so losing the
//! map on restart only makes everyone look offline until their next touch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::state::now_ms;

pub const DEFAULT_PRESENCE_TTL_MS: i64 = 20_000;

type PresenceKey = (String, String);

/// Last-seen timestamp and derived online flag for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    /// Milliseconds since Unix epoch; 0 when never seen.
    pub last_seen: i64,
    pub online: bool,
}

impl PresenceStatus {
    const UNSEEN: Self = Self { last_seen: 0, online: false };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceSummary {
    #[serde(rename = "self")]
    pub own: PresenceStatus,
    pub partner: Option<PresenceStatus>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    entries: Arc<Mutex<HashMap<PresenceKey, i64>>>,
    ttl_ms: i64,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(ttl_ms: i64) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), ttl_ms }
    }

    #[must_use]
    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PresenceKey, i64>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a heartbeat. Returns false (and records nothing) if either
    /// argument is empty.
    pub fn touch(&self, room_id: &str, participant_id: &str) -> bool {
        self.touch_at(room_id, participant_id, now_ms())
    }

    pub(crate) fn touch_at(&self, room_id: &str, participant_id: &str, now: i64) -> bool {
        let (room_id, participant_id) = (room_id.trim(), participant_id.trim());
        if room_id.is_empty() || participant_id.is_empty() {
            return false;
        }
        self.lock()
            .insert((room_id.to_owned(), participant_id.to_owned()), now);
        true
    }

    /// Drop a participant's entry. Idempotent.
    pub fn leave(&self, room_id: &str, participant_id: &str) {
        let removed = self
            .lock()
            .remove(&(room_id.trim().to_owned(), participant_id.trim().to_owned()));
        if removed.is_some() {
            debug!(%room_id, %participant_id, "presence entry removed");
        }
    }

    /// Presence for `participant_id` and, if given, its partner in the same room.
    #[must_use]
    pub fn summary(&self, room_id: &str, participant_id: &str, partner_id: Option<&str>) -> PresenceSummary {
        self.summary_at(room_id, participant_id, partner_id, now_ms())
    }

    pub(crate) fn summary_at(
        &self,
        room_id: &str,
        participant_id: &str,
        partner_id: Option<&str>,
        now: i64,
    ) -> PresenceSummary {
        let entries = self.lock();
        let status = |id: &str| {
            let key = (room_id.trim().to_owned(), id.trim().to_owned());
            match entries.get(&key) {
                Some(&last_seen) => PresenceStatus { last_seen, online: now - last_seen < self.ttl_ms },
                None => PresenceStatus::UNSEEN,
            }
        };
        PresenceSummary { own: status(participant_id), partner: partner_id.map(status) }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PRESENCE_TTL_MS)
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
