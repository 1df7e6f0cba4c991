use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::*;
use crate::state::test_helpers::{roster_pairing, test_app_state, test_app_state_on, test_app_state_with_roster};
use crate::storage::memory::MemoryBackend;
use crate::storage::{KvBackend, StorageError};

/// Memory backend whose writes can be switched to fail.
#[derive(Default)]
struct FlakyBackend {
    inner: MemoryBackend,
    fail_writes: AtomicBool,
}

#[async_trait]
impl KvBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn solo_session_then_assignment_shares_room() {
    let state = test_app_state().await;
    let s1 = start(&state, "A", "S1", "Kim").await.unwrap();
    assert!(s1.room_id.starts_with("solo-"));
    start(&state, "A", "S2", "Lee").await.unwrap();

    let request = AssignRequest { partner_session_key: Some("A::S2".into()), ..AssignRequest::default() };
    let s1 = assign_partner(&state, "A::S1", &request).await.unwrap();
    let s2 = show(&state, "A::S2").await.unwrap();

    assert_eq!(s1.room_id, s2.room_id);
    assert!(s1.room_id.starts_with("pair-"));
    assert_eq!(s1.partner.as_ref().unwrap().participant_id, "S2");
    assert_eq!(s2.partner.as_ref().unwrap().participant_id, "S1");
}

#[tokio::test]
async fn non_peer_group_advances_from_draft_straight_to_final() {
    let state = test_app_state().await;
    start(&state, "C", "S1", "Kim").await.unwrap();
    save_draft(&state, "C::S1", "my draft").await.unwrap();

    let view = advance_to_peer(&state, "C::S1").await.unwrap();
    assert_eq!(view.stage, 4);
    assert!(!view.peer_enabled);
}

#[tokio::test]
async fn peer_group_final_without_draft_names_draft() {
    let state = test_app_state().await;
    start(&state, "A", "S1", "Kim").await.unwrap();

    let err = advance_to_final(&state, "A::S1").await.unwrap_err();
    assert!(matches!(err, SessionError::Precondition { missing: crate::error::Prerequisite::Draft, .. }));
    assert_eq!(err.error_code(), "E_PRECONDITION");
    assert_eq!(show(&state, "A::S1").await.unwrap().stage, 1);
}

#[tokio::test]
async fn write_once_rejection_keeps_stored_text() {
    let state = test_app_state().await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    submit_prewriting(&state, "A::S1", "first").await.unwrap();

    let err = submit_prewriting(&state, "A::S1", "second").await.unwrap_err();
    assert_eq!(err.error_code(), "E_CONFLICT");
    assert_eq!(show(&state, "A::S1").await.unwrap().prewriting.text, "first");
}

#[tokio::test]
async fn full_peer_workflow_reaches_final() {
    let state = test_app_state_with_roster(roster_pairing("A", ("S1", "Kim"), ("S2", "Lee"))).await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    start(&state, "A", "S2", "Lee").await.unwrap();

    submit_prewriting(&state, "A::S1", "ideas").await.unwrap();
    save_draft(&state, "A::S1", "draft").await.unwrap();
    let view = advance_to_peer(&state, "A::S1").await.unwrap();
    assert_eq!(view.stage, 3);
    assert_eq!(view.stage_label, "peer notes");

    save_notes(&state, "A::S1", "notes on Lee's draft").await.unwrap();
    let view = advance_to_final(&state, "A::S1").await.unwrap();
    assert_eq!(view.stage, 4);

    let view = submit_final(&state, "A::S1", "final text").await.unwrap();
    assert_eq!(view.final_draft.text, "final text");

    // The partner sees S1's progress in its own view.
    let partner = show(&state, "A::S2").await.unwrap().partner.unwrap();
    assert_eq!(partner.stage, 4);
    assert_eq!(partner.draft.text, "draft");
    assert_eq!(partner.notes.text, "notes on Lee's draft");
}

// =============================================================================
// JUMP / REGRESS
// =============================================================================

#[tokio::test]
async fn jump_clamps_low_values_and_rejects_headroom_slot() {
    let state = test_app_state().await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    submit_prewriting(&state, "A::S1", "p").await.unwrap();

    assert_eq!(jump(&state, "A::S1", -10).await.unwrap().stage, 1);

    let err = jump(&state, "A::S1", 42).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)));
    assert_eq!(show(&state, "A::S1").await.unwrap().stage, 1);
}

#[tokio::test]
async fn jump_to_peer_stage_in_non_peer_group_is_precondition() {
    let state = test_app_state().await;
    start(&state, "C", "S1", "Kim").await.unwrap();
    let err = jump(&state, "C::S1", 3).await.unwrap_err();
    assert_eq!(err.error_code(), "E_PRECONDITION");
}

#[tokio::test]
async fn regress_then_advance_round_trip() {
    let state = test_app_state().await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    save_draft(&state, "A::S1", "d").await.unwrap();
    assert_eq!(regress(&state, "A::S1").await.unwrap().stage, 1);
    assert_eq!(advance_to_peer(&state, "A::S1").await.unwrap().stage, 2);
}

#[tokio::test]
async fn operations_on_unknown_session_are_not_found() {
    let state = test_app_state().await;
    let err = save_draft(&state, "A::ghost", "d").await.unwrap_err();
    assert_eq!(err.error_code(), "E_SESSION_NOT_FOUND");
    assert!(matches!(show(&state, "A::ghost").await, Err(SessionError::NotFound(_))));
    assert!(matches!(heartbeat(&state, "A::ghost").await, Err(SessionError::NotFound(_))));
}

#[tokio::test]
async fn writes_refresh_updated_at() {
    let state = test_app_state().await;
    let created = start(&state, "A", "S1", "Kim").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let updated = save_draft(&state, "A::S1", "d").await.unwrap();
    assert!(updated.updated_at > created.updated_at);
    assert_eq!(updated.created_at, created.created_at);
}

// =============================================================================
// VIEW / PRESENCE
// =============================================================================

#[tokio::test]
async fn view_reports_pending_partner_for_hint() {
    let state = test_app_state_with_roster(roster_pairing("A", ("S1", "Kim"), ("S2", "Lee"))).await;
    let view = start(&state, "A", "S1", "Kim").await.unwrap();

    assert!(view.partner.is_none());
    let pending = view.pending_partner.unwrap();
    assert_eq!(pending.participant_id, "S2");
    assert_eq!(pending.participant_name.as_deref(), Some("Lee"));
    assert!(view.presence.partner.is_none());
}

#[tokio::test]
async fn view_serializes_in_camel_case() {
    let state = test_app_state().await;
    let view = start(&state, "A", "S1", "Kim").await.unwrap();
    let json = serde_json::to_value(&view).unwrap();

    assert_eq!(json["sessionKey"], "A::S1");
    assert_eq!(json["stageLabel"], "prewriting");
    assert!(json["final"].is_object());
    assert!(json["presence"]["self"].is_object());
    assert!(json.get("partner").is_none());
}

#[tokio::test]
async fn heartbeat_marks_both_partners_online() {
    let state = test_app_state_with_roster(roster_pairing("A", ("S1", "Kim"), ("S2", "Lee"))).await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    start(&state, "A", "S2", "Lee").await.unwrap();

    heartbeat(&state, "A::S2").await.unwrap();
    let summary = heartbeat(&state, "A::S1").await.unwrap();
    assert!(summary.own.online);
    assert!(summary.partner.unwrap().online);

    leave(&state, "A::S2").await.unwrap();
    let view = show(&state, "A::S1").await.unwrap();
    assert!(!view.presence.partner.unwrap().online);
}

#[tokio::test]
async fn list_composes_views_per_group() {
    let state = test_app_state().await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    start(&state, "B", "S2", "Lee").await.unwrap();
    assert_eq!(list(&state, None).await.len(), 2);
    assert_eq!(list(&state, Some("b")).await[0].session_key, "B::S2");
}

// =============================================================================
// TRANSCRIPTS
// =============================================================================

#[tokio::test]
async fn peer_messages_are_shared_by_the_room() {
    let state = test_app_state_with_roster(roster_pairing("A", ("S1", "Kim"), ("S2", "Lee"))).await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    start(&state, "A", "S2", "Lee").await.unwrap();

    post_peer_message(&state, "A::S1", "hello").await.unwrap();
    post_peer_message(&state, "A::S2", " hi ").await.unwrap();

    let seen_by_s2 = transcript(&state, "A::S2", Channel::Peer).await.unwrap();
    let texts: Vec<&str> = seen_by_s2.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "hi"]);
    assert_eq!(seen_by_s2[0].from, "S1");
    assert!(transcript(&state, "A::S1", Channel::Ai).await.unwrap().is_empty());
}

#[tokio::test]
async fn blank_peer_message_is_rejected() {
    let state = test_app_state().await;
    start(&state, "A", "S1", "Kim").await.unwrap();
    assert!(matches!(post_peer_message(&state, "A::S1", "  ").await, Err(SessionError::Validation(_))));
}

// =============================================================================
// STORAGE FAILURES
// =============================================================================

#[tokio::test]
async fn failed_write_surfaces_storage_error_and_keeps_state() {
    let backend = Arc::new(FlakyBackend::default());
    let state = test_app_state_on(backend.clone()).await;
    start(&state, "A", "S1", "Kim").await.unwrap();

    backend.fail_writes.store(true, Ordering::SeqCst);
    let err = save_draft(&state, "A::S1", "lost?").await.unwrap_err();
    assert!(matches!(err, SessionError::Storage(StorageError::Io(_))));
    assert_eq!(err.error_code(), "E_STORAGE_IO");
    assert!(err.retryable());

    let view = show(&state, "A::S1").await.unwrap();
    assert!(view.draft.text.is_empty());
    assert_eq!(view.stage, 1);

    backend.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(save_draft(&state, "A::S1", "kept").await.unwrap().draft.text, "kept");
}

#[tokio::test]
async fn failed_create_leaves_no_session() {
    let backend = Arc::new(FlakyBackend::default());
    backend.fail_writes.store(true, Ordering::SeqCst);
    let state = test_app_state_on(backend.clone()).await;

    assert!(matches!(start(&state, "A", "S1", "Kim").await, Err(SessionError::Storage(_))));
    assert!(state.sessions.find("A::S1").await.is_none());
}
