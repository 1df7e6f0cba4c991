//! Composed session view returned by every workflow operation.

use serde::Serialize;

use crate::services::presence::PresenceSummary;
use crate::state::{AppState, ContentBlock, Session};

/// Snapshot of a linked partner's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerView {
    pub participant_id: String,
    pub participant_name: String,
    pub stage: u8,
    pub stage_label: &'static str,
    pub draft: ContentBlock,
    pub notes: ContentBlock,
}

/// A partner named on this session whose own session is not linked yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPartner {
    pub participant_id: String,
    pub participant_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_key: String,
    pub group: String,
    pub participant_id: String,
    pub participant_name: String,
    pub room_id: String,
    pub stage: u8,
    pub stage_label: &'static str,
    pub peer_enabled: bool,
    pub prewriting: ContentBlock,
    pub draft: ContentBlock,
    pub notes: ContentBlock,
    #[serde(rename = "final")]
    pub final_draft: ContentBlock,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<PartnerView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_partner: Option<PendingPartner>,
    pub presence: PresenceSummary,
}

/// Build the view for `session`, embedding its partner and room presence.
///
/// The partner snapshot appears only for a mutual link; a one-sided
/// reference is reported as `pending_partner`.
pub async fn compose(state: &AppState, session: &Session) -> SessionView {
    let linked = match session.partner_key() {
        Some(key) => state
            .sessions
            .find(&key)
            .await
            .filter(|other| other.points_at(session)),
        None => None,
    };

    let partner = linked.as_ref().map(|other| PartnerView {
        participant_id: other.participant_id.clone(),
        participant_name: other.participant_name.clone(),
        stage: other.stage.number(),
        stage_label: other.stage.label(),
        draft: other.draft.clone(),
        notes: other.notes.clone(),
    });
    let pending_partner = match (&linked, &session.partner_participant_id) {
        (None, Some(id)) => Some(PendingPartner {
            participant_id: id.clone(),
            participant_name: session.partner_name.clone(),
        }),
        _ => None,
    };
    let presence = state.presence.summary(
        &session.room_id,
        &session.participant_id,
        linked.as_ref().map(|other| other.participant_id.as_str()),
    );

    SessionView {
        session_key: session.session_key.clone(),
        group: session.group.clone(),
        participant_id: session.participant_id.clone(),
        participant_name: session.participant_name.clone(),
        room_id: session.room_id.clone(),
        stage: session.stage.number(),
        stage_label: session.stage.label(),
        peer_enabled: state.config.is_peer_group(&session.group),
        prewriting: session.prewriting.clone(),
        draft: session.draft.clone(),
        notes: session.notes.clone(),
        final_draft: session.final_draft.clone(),
        created_at: session.created_at,
        updated_at: session.updated_at,
        partner,
        pending_partner,
        presence,
    }
}
