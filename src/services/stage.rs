//! Stage machine — stage transitions and content submissions.
//!
//! DESIGN
//! ======
//! Pure functions over `&mut Session`. The caller supplies whether the
//! session's group has the peer-notes stage and the current time, then
//! persists the result. A rejected call leaves the session untouched.
//!
//! Gates checked by `jump_to` for its target:
//!   stage 2  needs prewriting
//!   stage 3  needs prewriting and draft, and a peer-enabled group
//!   stage 4  needs prewriting and draft, plus notes in a peer-enabled group
//!
//! `submit_final` is the one escape hatch: it writes the final text and
//! sets stage 4 regardless of the gates.

use crate::error::{Prerequisite, SessionError};
use crate::state::{Session, Stage};

/// First prerequisite of `target` that `session` is missing.
fn check_unlocked(session: &Session, target: Stage, peer_enabled: bool) -> Result<(), SessionError> {
    if target >= Stage::Draft && session.prewriting.is_empty() {
        return Err(SessionError::locked(target, Prerequisite::Prewriting));
    }
    if target >= Stage::PeerNotes && session.draft.is_empty() {
        return Err(SessionError::locked(target, Prerequisite::Draft));
    }
    if target == Stage::Final && peer_enabled && session.notes.is_empty() {
        return Err(SessionError::locked(target, Prerequisite::Notes));
    }
    Ok(())
}

fn require_text(text: &str, what: &str) -> Result<(), SessionError> {
    if text.trim().is_empty() {
        return Err(SessionError::validation(format!("{what} text is required")));
    }
    Ok(())
}

fn raise_to(session: &mut Session, floor: Stage) {
    if session.stage < floor {
        session.stage = floor;
    }
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Move one step forward: 1→2 unconditionally, 2→3 (peer groups) or 2→4
/// once a draft exists, 3→4 once notes exist. No-op at 4.
///
/// # Errors
///
/// Returns `Precondition` when the draft or notes the step needs are missing.
pub fn advance_to_peer(session: &mut Session, peer_enabled: bool) -> Result<(), SessionError> {
    session.stage = match session.stage {
        Stage::Prewriting => Stage::Draft,
        Stage::Draft => {
            let next = if peer_enabled { Stage::PeerNotes } else { Stage::Final };
            if session.draft.is_empty() {
                return Err(SessionError::locked(next, Prerequisite::Draft));
            }
            next
        }
        Stage::PeerNotes => {
            if session.notes.is_empty() {
                return Err(SessionError::locked(Stage::Final, Prerequisite::Notes));
            }
            Stage::Final
        }
        Stage::Final => Stage::Final,
    };
    Ok(())
}

/// Move straight to stage 4.
///
/// # Errors
///
/// Returns `Precondition` naming the first missing item: draft, then (peer
/// groups) notes, then (peer groups) having reached stage 3.
pub fn advance_to_final(session: &mut Session, peer_enabled: bool) -> Result<(), SessionError> {
    if session.draft.is_empty() {
        return Err(SessionError::locked(Stage::Final, Prerequisite::Draft));
    }
    if peer_enabled {
        if session.notes.is_empty() {
            return Err(SessionError::locked(Stage::Final, Prerequisite::Notes));
        }
        if session.stage < Stage::PeerNotes {
            return Err(SessionError::locked(Stage::Final, Prerequisite::PeerStage));
        }
    }
    session.stage = Stage::Final;
    Ok(())
}

/// Set the stage directly, forward or backward, if the target is unlocked.
/// Jumping to the current stage is a no-op.
///
/// # Errors
///
/// Returns `Validation` for a target outside 1..=4, `Precondition` for
/// stage 3 in a group without peer notes or for a locked target.
pub fn jump_to(session: &mut Session, desired: u8, peer_enabled: bool) -> Result<(), SessionError> {
    let target = Stage::try_from(desired).map_err(|e| SessionError::validation(e.to_string()))?;
    if target == Stage::PeerNotes && !peer_enabled {
        return Err(SessionError::locked(target, Prerequisite::PeerGroup));
    }
    if target == session.stage {
        return Ok(());
    }
    check_unlocked(session, target, peer_enabled)?;
    session.stage = target;
    Ok(())
}

/// Step back one stage: 4→3 (peer groups) or 4→2, 3→2, 2→1. Floor at 1.
pub fn regress(session: &mut Session, peer_enabled: bool) {
    session.stage = match session.stage {
        Stage::Final if peer_enabled => Stage::PeerNotes,
        Stage::Final | Stage::PeerNotes => Stage::Draft,
        Stage::Draft | Stage::Prewriting => Stage::Prewriting,
    };
}

/// Clamp a raw jump request into `1..=4 + headroom`.
///
/// With nonzero headroom, out-of-range requests just above stage 4 survive
/// clamping and are then rejected by [`jump_to`] instead of being silently
/// snapped to 4.
#[must_use]
pub fn clamp_jump_target(raw: i64, headroom: u8) -> u8 {
    let upper = Stage::MAX.saturating_add(headroom);
    u8::try_from(raw.clamp(1, i64::from(upper))).unwrap_or(upper)
}

// =============================================================================
// SUBMISSIONS
// =============================================================================

/// Write-once prewriting. Raises the stage to 2.
///
/// # Errors
///
/// `Validation` for blank text, `Conflict` if prewriting already exists.
pub fn submit_prewriting(session: &mut Session, text: &str, now: i64) -> Result<(), SessionError> {
    require_text(text, "prewriting")?;
    if !session.prewriting.is_empty() {
        return Err(SessionError::Conflict("prewriting"));
    }
    session.prewriting.write(text, now);
    raise_to(session, Stage::Draft);
    Ok(())
}

/// Overwrite the draft. Raises the stage to 2.
pub fn save_draft(session: &mut Session, text: &str, now: i64) {
    session.draft.write(text, now);
    raise_to(session, Stage::Draft);
}

/// Overwrite the peer notes. Raises the stage to 3 in peer groups; other
/// groups keep the text without a stage change.
pub fn save_notes(session: &mut Session, text: &str, now: i64, peer_enabled: bool) {
    session.notes.write(text, now);
    if peer_enabled {
        raise_to(session, Stage::PeerNotes);
    }
}

/// Write-once final draft. Sets stage 4 unconditionally.
///
/// # Errors
///
/// `Validation` for blank text, `Conflict` if a final draft already exists.
pub fn submit_final(session: &mut Session, text: &str, now: i64) -> Result<(), SessionError> {
    require_text(text, "final")?;
    if !session.final_draft.is_empty() {
        return Err(SessionError::Conflict("final draft"));
    }
    session.final_draft.write(text, now);
    session.stage = Stage::Final;
    Ok(())
}

#[cfg(test)]
#[path = "stage_test.rs"]
mod tests;
