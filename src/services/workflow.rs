//! Workflow — the operations a host exposes to participants and admins.
//!
//! DESIGN
//! ======
//! Each write runs load → stage machine → persist through
//! `SessionStore::mutate` and answers with a freshly composed
//! `SessionView`, so callers always see the partner snapshot and presence
//! as of the write.
//!
//! ERROR HANDLING
//! ==============
//! Guard violations are logged at debug and returned verbatim; storage
//! failures were already logged at error by the store.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{ErrorCode, SessionError};
use crate::services::identity;
use crate::services::partner::{self, AssignRequest};
use crate::services::presence::PresenceSummary;
use crate::services::session::{self, DeleteReport};
use crate::services::stage;
use crate::services::transcript::ChatMessage;
use crate::services::view::{self, SessionView};
use crate::state::{AppState, Session, now_ms};

// =============================================================================
// READS
// =============================================================================

/// Start or resume a session.
///
/// # Errors
///
/// Returns `Validation` for an empty group or id, or a storage error.
pub async fn start(
    state: &AppState,
    group: &str,
    participant_id: &str,
    participant_name: &str,
) -> Result<SessionView, SessionError> {
    let session = session::ensure(state, group, participant_id, participant_name).await?;
    Ok(view::compose(state, &session).await)
}

/// # Errors
///
/// Returns `NotFound` for an unknown session.
pub async fn show(state: &AppState, session_key: &str) -> Result<SessionView, SessionError> {
    let session = load(state, session_key).await?;
    Ok(view::compose(state, &session).await)
}

pub async fn list(state: &AppState, group: Option<&str>) -> Vec<SessionView> {
    let mut views = Vec::new();
    for session in state.sessions.list(group).await {
        views.push(view::compose(state, &session).await);
    }
    views
}

async fn load(state: &AppState, session_key: &str) -> Result<Session, SessionError> {
    state
        .sessions
        .find(session_key)
        .await
        .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Run `apply` under the session lock with the group's peer flag and the
/// current time, then compose the view.
async fn transition<F>(
    state: &AppState,
    session_key: &str,
    action: &'static str,
    apply: F,
) -> Result<SessionView, SessionError>
where
    F: FnOnce(&mut Session, bool, i64) -> Result<(), SessionError>,
{
    let config = state.config.clone();
    let mut from = None;
    let result = state
        .sessions
        .mutate(session_key, |s| {
            from = Some(s.stage);
            apply(s, config.is_peer_group(&s.group), now_ms())
        })
        .await;

    let session = match result {
        Ok(session) => session,
        Err(e) => {
            debug!(%session_key, action, code = e.error_code(), error = %e, "workflow action rejected");
            return Err(e);
        }
    };
    if from != Some(session.stage) {
        info!(%session_key, action, from = ?from.map(|s| s.number()), to = session.stage.number(), "stage changed");
    }
    Ok(view::compose(state, &session).await)
}

/// # Errors
///
/// `NotFound`, `Validation` (blank text), `Conflict` (already submitted), or storage.
pub async fn submit_prewriting(state: &AppState, session_key: &str, text: &str) -> Result<SessionView, SessionError> {
    transition(state, session_key, "submit_prewriting", |s, _, now| {
        stage::submit_prewriting(s, text, now)
    })
    .await
}

/// # Errors
///
/// `NotFound` or storage.
pub async fn save_draft(state: &AppState, session_key: &str, text: &str) -> Result<SessionView, SessionError> {
    transition(state, session_key, "save_draft", |s, _, now| {
        stage::save_draft(s, text, now);
        Ok(())
    })
    .await
}

/// # Errors
///
/// `NotFound` or storage.
pub async fn save_notes(state: &AppState, session_key: &str, text: &str) -> Result<SessionView, SessionError> {
    transition(state, session_key, "save_notes", |s, peer, now| {
        stage::save_notes(s, text, now, peer);
        Ok(())
    })
    .await
}

/// # Errors
///
/// `NotFound`, `Validation` (blank text), `Conflict` (already submitted), or storage.
pub async fn submit_final(state: &AppState, session_key: &str, text: &str) -> Result<SessionView, SessionError> {
    transition(state, session_key, "submit_final", |s, _, now| {
        stage::submit_final(s, text, now)
    })
    .await
}

/// # Errors
///
/// `NotFound`, `Precondition`, or storage.
pub async fn advance_to_peer(state: &AppState, session_key: &str) -> Result<SessionView, SessionError> {
    transition(state, session_key, "advance_to_peer", |s, peer, _| {
        stage::advance_to_peer(s, peer)
    })
    .await
}

/// # Errors
///
/// `NotFound`, `Precondition`, or storage.
pub async fn advance_to_final(state: &AppState, session_key: &str) -> Result<SessionView, SessionError> {
    transition(state, session_key, "advance_to_final", |s, peer, _| {
        stage::advance_to_final(s, peer)
    })
    .await
}

/// Jump to a raw, caller-supplied stage number. The number is clamped with
/// the configured headroom before the stage machine sees it.
///
/// # Errors
///
/// `NotFound`, `Validation` (target above 4 after clamping), `Precondition`, or storage.
pub async fn jump(state: &AppState, session_key: &str, raw_stage: i64) -> Result<SessionView, SessionError> {
    let desired = stage::clamp_jump_target(raw_stage, state.config.jump_stage_headroom);
    transition(state, session_key, "jump", |s, peer, _| stage::jump_to(s, desired, peer)).await
}

/// # Errors
///
/// `NotFound` or storage.
pub async fn regress(state: &AppState, session_key: &str) -> Result<SessionView, SessionError> {
    transition(state, session_key, "regress", |s, peer, _| {
        stage::regress(s, peer);
        Ok(())
    })
    .await
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Record a heartbeat in the session's room.
///
/// # Errors
///
/// Returns `NotFound` for an unknown session.
pub async fn heartbeat(state: &AppState, session_key: &str) -> Result<PresenceSummary, SessionError> {
    let session = load(state, session_key).await?;
    state.presence.touch(&session.room_id, &session.participant_id);
    let partner_id = match session.partner_key() {
        Some(key) => state
            .sessions
            .find(&key)
            .await
            .filter(|other| other.points_at(&session))
            .map(|other| other.participant_id),
        None => None,
    };
    Ok(state
        .presence
        .summary(&session.room_id, &session.participant_id, partner_id.as_deref()))
}

/// # Errors
///
/// Returns `NotFound` for an unknown session.
pub async fn leave(state: &AppState, session_key: &str) -> Result<(), SessionError> {
    let session = load(state, session_key).await?;
    state.presence.leave(&session.room_id, &session.participant_id);
    Ok(())
}

// =============================================================================
// PARTNERS
// =============================================================================

/// # Errors
///
/// See [`partner::assign`].
pub async fn assign_partner(
    state: &AppState,
    session_key: &str,
    request: &AssignRequest,
) -> Result<SessionView, SessionError> {
    let session = partner::assign(state, session_key, request).await?;
    Ok(view::compose(state, &session).await)
}

/// # Errors
///
/// See [`partner::clear`].
pub async fn clear_partner(state: &AppState, session_key: &str) -> Result<SessionView, SessionError> {
    let session = partner::clear(state, session_key).await?;
    Ok(view::compose(state, &session).await)
}

/// # Errors
///
/// See [`session::delete`].
pub async fn delete(state: &AppState, session_keys: &BTreeSet<String>) -> Result<DeleteReport, SessionError> {
    session::delete(state, session_keys).await
}

// =============================================================================
// TRANSCRIPTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// The session's private AI conversation.
    Ai,
    /// The conversation in the session's room.
    Peer,
}

fn chat_id(session: &Session, channel: Channel) -> String {
    match channel {
        Channel::Ai => identity::ai_chat_id(&session.session_key),
        Channel::Peer => identity::peer_chat_id(&session.room_id),
    }
}

/// Post a message from the session's participant to its room.
///
/// # Errors
///
/// `NotFound`, `Validation` (blank text), or storage.
pub async fn post_peer_message(state: &AppState, session_key: &str, text: &str) -> Result<ChatMessage, SessionError> {
    let session = load(state, session_key).await?;
    let text = text.trim();
    if text.is_empty() {
        return Err(SessionError::validation("message text is required"));
    }
    let message = ChatMessage { from: session.participant_id.clone(), text: text.to_owned(), ts: now_ms() };
    state
        .transcripts
        .append(&chat_id(&session, Channel::Peer), message.clone())
        .await?;
    Ok(message)
}

/// # Errors
///
/// `NotFound` or storage.
pub async fn transcript(state: &AppState, session_key: &str, channel: Channel) -> Result<Vec<ChatMessage>, SessionError> {
    let session = load(state, session_key).await?;
    Ok(state.transcripts.history(&chat_id(&session, channel)).await?)
}

#[cfg(test)]
#[path = "workflow_test.rs"]
mod tests;
