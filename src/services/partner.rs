//! Partner matcher — roster lookup, linking, manual assignment.
//!
//! DESIGN
//! ======
//! A link is two mutual references: each session's `partner_participant_id`
//! names the other, and both share one `pair-` room. A session may also hold
//! a one-sided hint (partner id and name, no session behind it yet); the hint
//! becomes a link when the partner's own session is ensured.
//!
//! ROOM RULES
//! ==========
//! A solo room is provisional and is upgraded when a link forms. An existing
//! pair room is kept: the shared room is the initiator's pair room, else the
//! partner's, else the derived `pair_room_id` of both keys. Rooms fall back
//! to solo only when a link is explicitly dissolved.
//!
//! LOCKING
//! =======
//! Every multi-session edit locks the full set of sessions it may write
//! (both sides plus each side's previous partner). The set is re-derived
//! after locking; if it grew meanwhile, the locks are released and taken
//! again.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::SessionError;
use crate::locks::KeyGuard;
use crate::roster::{PairingDeclaration, Roster, RosterEntry};
use crate::services::identity;
use crate::services::session::{apply_name, display_name};
use crate::state::{AppState, Session, now_ms};

/// Result of a partner lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingMatch {
    pub room_id: String,
    pub partner_id: String,
    pub partner_name: String,
}

/// Manual pairing request. Either `partner_session_key` or `partner_id`
/// must be present; the key wins when both are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub partner_session_key: Option<String>,
    pub partner_id: Option<String>,
    pub partner_name: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// LOOKUP
// =============================================================================

/// The side of `declaration` opposite the entry matching `is_self`.
fn counterpart(declaration: &PairingDeclaration, is_self: impl Fn(&RosterEntry) -> bool) -> Option<&RosterEntry> {
    if is_self(&declaration.primary) {
        Some(&declaration.partner)
    } else if is_self(&declaration.partner) {
        Some(&declaration.primary)
    } else {
        None
    }
}

/// Find the declared partner of a participant.
///
/// Matches by participant id first, then by display name (trimmed,
/// case-insensitive). Declarations whose other side has no usable id are
/// ignored. The room returned is the derived pair room of both keys.
#[must_use]
pub fn lookup(roster: &dyn Roster, group: &str, participant_id: &str, participant_name: &str) -> Option<PairingMatch> {
    let own_key = identity::session_key(group, participant_id).ok()?;
    let group = identity::normalize_group(group).ok()?;
    let participant_id = participant_id.trim();
    let name = participant_name.trim().to_lowercase();
    let declarations = roster.pairings(&group);

    let usable = |entry: &&RosterEntry| !entry.id.is_empty() && entry.id != participant_id;
    let by_id = || {
        declarations
            .iter()
            .filter_map(|d| counterpart(d, |e| e.id == participant_id))
            .find(usable)
    };
    let by_name = || {
        if name.is_empty() {
            return None;
        }
        declarations
            .iter()
            .filter_map(|d| counterpart(d, |e| e.name.trim().to_lowercase() == name))
            .find(usable)
    };

    let partner = by_id().or_else(by_name)?;
    let partner_key = identity::session_key(&group, &partner.id).ok()?;
    Some(PairingMatch {
        room_id: identity::pair_room_id(&own_key, &partner_key),
        partner_id: partner.id.clone(),
        partner_name: partner.name.clone(),
    })
}

/// Roster lookup (when `use_roster` is set), falling back to an existing
/// session in the same group that already holds this participant as a
/// partner hint. The hint fallback applies to every group.
pub(crate) async fn discover(
    state: &AppState,
    group: &str,
    participant_id: &str,
    participant_name: &str,
    use_roster: bool,
) -> Option<PairingMatch> {
    if use_roster && let Some(found) = lookup(state.roster.as_ref(), group, participant_id, participant_name) {
        return Some(found);
    }
    let own_key = identity::session_key(group, participant_id).ok()?;
    state
        .sessions
        .list(Some(group))
        .await
        .into_iter()
        .find(|s| s.session_key != own_key && s.partner_participant_id.as_deref() == Some(participant_id))
        .map(|s| PairingMatch {
            room_id: identity::pair_room_id(&own_key, &s.session_key),
            partner_id: s.participant_id,
            partner_name: s.participant_name,
        })
}

// =============================================================================
// LINKING PRIMITIVES
// =============================================================================

/// Drop partner fields; a pair room falls back to the session's solo room.
pub(crate) fn unlink(session: &mut Session) {
    session.partner_participant_id = None;
    session.partner_name = None;
    if identity::is_pair_room(&session.room_id)
        && let Ok(room) = identity::solo_room_id(&session.group, &session.participant_id)
    {
        session.room_id = room;
    }
}

fn shared_room(initiator: &Session, partner: &Session) -> String {
    [initiator, partner]
        .into_iter()
        .map(|s| s.room_id.as_str())
        .find(|room| identity::is_pair_room(room))
        .map_or_else(
            || identity::pair_room_id(&initiator.session_key, &partner.session_key),
            str::to_owned,
        )
}

fn link(initiator: &mut Session, partner: &mut Session) {
    let room = shared_room(initiator, partner);
    initiator.partner_participant_id = Some(partner.participant_id.clone());
    initiator.partner_name = Some(partner.participant_name.clone());
    partner.partner_participant_id = Some(initiator.participant_id.clone());
    partner.partner_name = Some(initiator.participant_name.clone());
    initiator.room_id.clone_from(&room);
    partner.room_id = room;
}

/// Sessions a partner edit on `session_key` (optionally toward `target_key`)
/// may write.
async fn related_keys(
    state: &AppState,
    session_key: &str,
    target_key: Option<&str>,
) -> Result<BTreeSet<String>, SessionError> {
    let session = state
        .sessions
        .find(session_key)
        .await
        .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))?;
    let mut keys = BTreeSet::from([session.session_key.clone()]);
    keys.extend(session.partner_key());
    if let Some(target_key) = target_key {
        keys.insert(target_key.to_owned());
        if let Some(target) = state.sessions.find(target_key).await {
            keys.extend(target.partner_key());
        }
    }
    Ok(keys)
}

async fn lock_related(
    state: &AppState,
    session_key: &str,
    target_key: Option<&str>,
) -> Result<KeyGuard, SessionError> {
    loop {
        let keys = related_keys(state, session_key, target_key).await?;
        let guard = state.sessions.lock(&keys).await;
        if related_keys(state, session_key, target_key)
            .await?
            .is_subset(&keys)
        {
            return Ok(guard);
        }
    }
}

/// `session_key` plus every session it names or that names it.
async fn linked_keys(state: &AppState, session_key: &str) -> Option<BTreeSet<String>> {
    let session = state.sessions.find(session_key).await?;
    let mut keys = BTreeSet::from([session.session_key.clone()]);
    keys.extend(session.partner_key());
    keys.extend(
        state
            .sessions
            .list(Some(&session.group))
            .await
            .into_iter()
            .filter(|s| s.points_at(&session))
            .map(|s| s.session_key),
    );
    Some(keys)
}

/// Lock a session together with everything linked to it in either
/// direction. `None` when the session does not exist.
pub(crate) async fn lock_linked(state: &AppState, session_key: &str) -> Option<KeyGuard> {
    loop {
        let keys = linked_keys(state, session_key).await?;
        let guard = state.sessions.lock(&keys).await;
        if linked_keys(state, session_key).await?.is_subset(&keys) {
            return Some(guard);
        }
    }
}

/// Unlink every other session that names `session`, then `session` itself.
/// Caller holds the `lock_linked` guard.
pub(crate) async fn detach(state: &AppState, session: &Session) -> Result<(), SessionError> {
    let mut touched: Vec<Session> = state
        .sessions
        .list(Some(&session.group))
        .await
        .into_iter()
        .filter(|s| s.session_key != session.session_key && s.points_at(session))
        .collect();
    for survivor in &mut touched {
        unlink(survivor);
        info!(session_key = %survivor.session_key, removed = %session.session_key, "dangling partner link cleared");
    }
    if session.partner_participant_id.is_some() {
        let mut me = session.clone();
        unlink(&mut me);
        touched.push(me);
    }
    persist_all(state, &mut touched).await
}

/// Unlink `side` from its current partner unless that partner is
/// `keep_key`. A previous partner that points back is unlinked too and
/// queued in `touched`.
async fn release_previous(state: &AppState, side: &mut Session, keep_key: &str, touched: &mut Vec<Session>) {
    let Some(old_key) = side.partner_key() else {
        return;
    };
    if old_key == keep_key {
        return;
    }
    if let Some(mut old) = state.sessions.find(&old_key).await
        && old.points_at(side)
    {
        unlink(&mut old);
        touched.push(old);
    }
    info!(session_key = %side.session_key, previous = %old_key, "previous partner released");
    unlink(side);
}

async fn persist_all(state: &AppState, sessions: &mut [Session]) -> Result<(), SessionError> {
    let now = now_ms();
    for session in sessions.iter_mut() {
        session.updated_at = now;
    }
    for session in sessions.iter() {
        state.sessions.put(session).await?;
    }
    Ok(())
}

// =============================================================================
// ENSURE-TIME LINKING
// =============================================================================

/// Create or backfill `key` with the discovered partner.
///
/// Links both sessions when the partner's session exists and is free (or
/// already points here). A partner linked to someone else leaves this
/// session without partner fields. A partner with no session yet is stored
/// as a hint, and a brand-new session starts in the pair room.
pub(crate) async fn ensure_linked(
    state: &AppState,
    key: &str,
    group: &str,
    participant_id: &str,
    participant_name: &str,
    found: &PairingMatch,
) -> Result<Session, SessionError> {
    let partner_key = identity::session_key(group, &found.partner_id)?;
    let _guard = state.sessions.lock([key, partner_key.as_str()]).await;

    let mut me = match state.sessions.find(key).await {
        Some(mut existing) => {
            apply_name(&mut existing, participant_name);
            if existing.partner_participant_id.is_some() {
                // Linked by a concurrent call while we were matching.
                persist_all(state, std::slice::from_mut(&mut existing)).await?;
                return Ok(existing);
            }
            existing
        }
        None => {
            let session = Session::new(
                key.to_owned(),
                group.to_owned(),
                participant_id.to_owned(),
                display_name(participant_name, participant_id),
                String::new(),
                now_ms(),
            );
            info!(session_key = %key, "session created");
            session
        }
    };

    match state.sessions.find(&partner_key).await {
        Some(other) if other.partner_participant_id.as_deref().is_some_and(|p| p != me.participant_id) => {
            warn!(session_key = %key, %partner_key, "declared partner is linked elsewhere; staying solo");
            if me.room_id.is_empty() {
                me.room_id = identity::solo_room_id(group, participant_id)?;
            }
            persist_all(state, std::slice::from_mut(&mut me)).await?;
            Ok(me)
        }
        Some(mut other) => {
            link(&mut me, &mut other);
            info!(session_key = %key, %partner_key, room_id = %me.room_id, "sessions linked");
            let mut both = [other, me];
            persist_all(state, &mut both).await?;
            let [_, me] = both;
            Ok(me)
        }
        None => {
            me.partner_participant_id = Some(found.partner_id.clone());
            me.partner_name = non_blank(Some(&found.partner_name)).map(str::to_owned);
            if me.room_id.is_empty() {
                me.room_id.clone_from(&found.room_id);
            }
            info!(session_key = %key, partner_id = %found.partner_id, "partner hint recorded");
            persist_all(state, std::slice::from_mut(&mut me)).await?;
            Ok(me)
        }
    }
}

// =============================================================================
// MANUAL ASSIGNMENT
// =============================================================================

/// Pair `session_key` with the partner named in `request`.
///
/// With a concrete partner session both sides are linked; any previous
/// partner of either side is unlinked. Without one, the partner id and name
/// are stored as a hint and the session returns to its solo room.
///
/// # Errors
///
/// Returns `Validation` when no partner is named, the partner is the session
/// itself or belongs to another group, `NotFound` for an unknown session,
/// or a storage error.
pub async fn assign(state: &AppState, session_key: &str, request: &AssignRequest) -> Result<Session, SessionError> {
    let current = state
        .sessions
        .find(session_key)
        .await
        .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))?;

    let target_key = match (
        non_blank(request.partner_session_key.as_deref()),
        non_blank(request.partner_id.as_deref()),
    ) {
        (Some(key), _) => key.to_owned(),
        (None, Some(id)) => identity::session_key(&current.group, id)?,
        (None, None) => return Err(SessionError::validation("partner session key or partner id is required")),
    };
    let Some((target_group, target_id)) = identity::split_session_key(&target_key) else {
        return Err(SessionError::validation(format!("malformed session key {target_key:?}")));
    };
    if target_group != current.group {
        return Err(SessionError::validation(format!(
            "partner must belong to group {}",
            current.group
        )));
    }
    if target_key == current.session_key {
        return Err(SessionError::validation("a session cannot be its own partner"));
    }
    let target_id = target_id.to_owned();

    let _guard = lock_related(state, session_key, Some(&target_key)).await?;
    let mut me = state
        .sessions
        .find(session_key)
        .await
        .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))?;
    let mut touched = Vec::new();

    if let Some(mut other) = state.sessions.find(&target_key).await {
        release_previous(state, &mut me, &target_key, &mut touched).await;
        release_previous(state, &mut other, &me.session_key, &mut touched).await;
        link(&mut me, &mut other);
        info!(%session_key, partner_key = %target_key, room_id = %me.room_id, "partner assigned");
        touched.push(other);
    } else {
        release_previous(state, &mut me, &target_key, &mut touched).await;
        unlink(&mut me);
        me.partner_participant_id = Some(target_id);
        me.partner_name = non_blank(request.partner_name.as_deref()).map(str::to_owned);
        info!(%session_key, partner_key = %target_key, "partner hint assigned");
    }

    touched.push(me);
    persist_all(state, &mut touched).await?;
    touched
        .pop()
        .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))
}

/// Dissolve the session's partner link. The partner is unlinked as well if
/// it points back. Both sides return to their solo rooms.
///
/// # Errors
///
/// Returns `NotFound` for an unknown session, or a storage error.
pub async fn clear(state: &AppState, session_key: &str) -> Result<Session, SessionError> {
    let _guard = lock_related(state, session_key, None).await?;
    let mut me = state
        .sessions
        .find(session_key)
        .await
        .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))?;

    let mut touched = Vec::new();
    if let Some(partner_key) = me.partner_key()
        && let Some(mut other) = state.sessions.find(&partner_key).await
        && other.points_at(&me)
    {
        unlink(&mut other);
        touched.push(other);
    }
    unlink(&mut me);
    info!(%session_key, unlinked_partner = !touched.is_empty(), "partner cleared");

    touched.push(me);
    persist_all(state, &mut touched).await?;
    touched
        .pop()
        .ok_or_else(|| SessionError::NotFound(session_key.to_owned()))
}

#[cfg(test)]
#[path = "partner_test.rs"]
mod tests;
