//! Identity codec — deterministic session keys and room ids.
//!
//! DESIGN
//! ======
//! Session keys are `<GROUP>::<participant id>`. Groups may not contain `:`,
//! so the first separator always splits group from id and distinct pairs can
//! never collide.
//!
//! Room ids are SHA-256 derived. The pair room hashes both session keys in
//! sorted order, which lets two sessions created independently (one per
//! participant) converge on the same room without coordination.

use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::error::SessionError;

pub const KEY_SEPARATOR: &str = "::";
pub const SOLO_ROOM_PREFIX: &str = "solo-";
pub const PAIR_ROOM_PREFIX: &str = "pair-";

/// Hex chars of the digest kept in a room id (96 bits).
const ROOM_HASH_LEN: usize = 24;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn digest_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        // Length prefix keeps ("ab","c") and ("a","bc") apart.
        hasher.update(part.len().to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let mut hex = bytes_to_hex(&hasher.finalize());
    hex.truncate(ROOM_HASH_LEN);
    hex
}

/// Canonical form of a group tag: trimmed, upper case.
///
/// # Errors
///
/// Returns `Validation` if the group is empty or contains `:`.
pub fn normalize_group(group: &str) -> Result<String, SessionError> {
    let group = group.trim().to_uppercase();
    if group.is_empty() {
        return Err(SessionError::validation("group is required"));
    }
    if group.contains(':') {
        return Err(SessionError::validation(format!("group {group:?} may not contain ':'")));
    }
    Ok(group)
}

/// Build the session key for `(group, participant_id)`.
///
/// # Errors
///
/// Returns `Validation` if either part is empty after trimming.
pub fn session_key(group: &str, participant_id: &str) -> Result<String, SessionError> {
    let group = normalize_group(group)?;
    let participant_id = participant_id.trim();
    if participant_id.is_empty() {
        return Err(SessionError::validation("participant id is required"));
    }
    Ok(format!("{group}{KEY_SEPARATOR}{participant_id}"))
}

/// Split a session key back into `(group, participant_id)`.
#[must_use]
pub fn split_session_key(key: &str) -> Option<(&str, &str)> {
    let (group, id) = key.split_once(KEY_SEPARATOR)?;
    if group.is_empty() || id.is_empty() {
        return None;
    }
    Some((group, id))
}

/// Room used by a participant working alone.
///
/// # Errors
///
/// Returns `Validation` for the same inputs `session_key` rejects.
pub fn solo_room_id(group: &str, participant_id: &str) -> Result<String, SessionError> {
    let key = session_key(group, participant_id)?;
    Ok(format!("{SOLO_ROOM_PREFIX}{}", digest_hex(&[&key])))
}

/// Room shared by two paired sessions. `pair_room_id(a, b) == pair_room_id(b, a)`.
#[must_use]
pub fn pair_room_id(key_a: &str, key_b: &str) -> String {
    let (lo, hi) = if key_a <= key_b { (key_a, key_b) } else { (key_b, key_a) };
    format!("{PAIR_ROOM_PREFIX}{}", digest_hex(&[lo, hi]))
}

#[must_use]
pub fn is_pair_room(room_id: &str) -> bool {
    room_id.starts_with(PAIR_ROOM_PREFIX)
}

/// Transcript id for a session's private AI conversation.
#[must_use]
pub fn ai_chat_id(session_key: &str) -> String {
    format!("ai:{session_key}")
}

/// Transcript id for the conversation held in a room.
#[must_use]
pub fn peer_chat_id(room_id: &str) -> String {
    format!("peer:{room_id}")
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
