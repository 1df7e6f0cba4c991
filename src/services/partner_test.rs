use super::*;
use crate::roster::StaticRoster;
use crate::services::session::ensure;
use crate::state::test_helpers::{roster_pairing, test_app_state};

fn by_key(key: &str) -> AssignRequest {
    AssignRequest { partner_session_key: Some(key.into()), ..AssignRequest::default() }
}

fn by_id(id: &str, name: Option<&str>) -> AssignRequest {
    AssignRequest { partner_id: Some(id.into()), partner_name: name.map(Into::into), ..AssignRequest::default() }
}

async fn find(state: &AppState, key: &str) -> Session {
    state.sessions.find(key).await.unwrap()
}

// =============================================================================
// LOOKUP
// =============================================================================

#[test]
fn lookup_matches_either_side_by_id() {
    let roster = roster_pairing("A", ("S1", "Kim"), ("S2", "Lee"));
    let from_primary = lookup(&roster, "a", "S1", "").unwrap();
    let from_partner = lookup(&roster, "A", "S2", "").unwrap();

    assert_eq!(from_primary.partner_id, "S2");
    assert_eq!(from_primary.partner_name, "Lee");
    assert_eq!(from_partner.partner_id, "S1");
    assert_eq!(from_primary.room_id, from_partner.room_id);
    assert_eq!(from_primary.room_id, identity::pair_room_id("A::S1", "A::S2"));
}

#[test]
fn lookup_prefers_id_over_name() {
    let roster = roster_pairing("A", ("X", "Kim"), ("S9", "Ash"))
        .with_pairing("A", PairingDeclaration::new(("S1", "Other"), ("S2", "Lee")));
    let found = lookup(&roster, "A", "S1", "Kim").unwrap();
    assert_eq!(found.partner_id, "S2");
}

#[test]
fn lookup_falls_back_to_trimmed_case_insensitive_name() {
    let roster = roster_pairing("A", ("", "Kim Park"), ("S2", "Lee"));
    let found = lookup(&roster, "A", "S1", " KIM PARK ").unwrap();
    assert_eq!(found.partner_id, "S2");
}

#[test]
fn lookup_skips_partner_without_id() {
    // S2's counterpart has no id, so S2 cannot be matched to anyone.
    let roster = roster_pairing("A", ("", "Kim"), ("S2", "Lee"));
    assert!(lookup(&roster, "A", "S2", "Lee").is_none());
}

#[test]
fn lookup_misses_return_none() {
    let roster = roster_pairing("A", ("S1", "Kim"), ("S2", "Lee"));
    assert!(lookup(&roster, "A", "S3", "Ash").is_none());
    assert!(lookup(&roster, "B", "S1", "Kim").is_none());
    assert!(lookup(&StaticRoster::default(), "A", "S1", "Kim").is_none());
    assert!(lookup(&roster, "", "S1", "Kim").is_none());
}

#[test]
fn lookup_name_collision_takes_first_declaration() {
    // Known limitation: duplicate display names are not disambiguated.
    let roster = roster_pairing("A", ("", "Kim"), ("S2", "Lee"))
        .with_pairing("A", PairingDeclaration::new(("", "Kim"), ("S3", "Ash")));
    assert_eq!(lookup(&roster, "A", "S1", "kim").unwrap().partner_id, "S2");
}

// =============================================================================
// ASSIGN
// =============================================================================

#[tokio::test]
async fn assign_links_two_solo_sessions_into_shared_room() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();
    ensure(&state, "A", "S2", "Lee").await.unwrap();

    let s1 = assign(&state, "A::S1", &by_key("A::S2")).await.unwrap();
    let s2 = find(&state, "A::S2").await;

    assert_eq!(s1.room_id, identity::pair_room_id("A::S1", "A::S2"));
    assert_eq!(s2.room_id, s1.room_id);
    assert_eq!(s1.partner_participant_id.as_deref(), Some("S2"));
    assert_eq!(s1.partner_name.as_deref(), Some("Lee"));
    assert_eq!(s2.partner_participant_id.as_deref(), Some("S1"));
    assert_eq!(s2.partner_name.as_deref(), Some("Kim"));
}

#[tokio::test]
async fn assign_by_participant_id_uses_own_group() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();
    ensure(&state, "A", "S2", "Lee").await.unwrap();

    assign(&state, "A::S1", &by_id("S2", None)).await.unwrap();
    assert_eq!(find(&state, "A::S2").await.partner_participant_id.as_deref(), Some("S1"));
}

#[tokio::test]
async fn assign_is_idempotent_and_keeps_room() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();
    ensure(&state, "A", "S2", "Lee").await.unwrap();

    let first = assign(&state, "A::S1", &by_key("A::S2")).await.unwrap();
    let again = assign(&state, "A::S2", &by_key("A::S1")).await.unwrap();
    assert_eq!(again.room_id, first.room_id);
    assert_eq!(find(&state, "A::S1").await.partner_participant_id.as_deref(), Some("S2"));
}

#[tokio::test]
async fn assign_keeps_initiators_existing_pair_room() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();
    ensure(&state, "A", "S2", "Lee").await.unwrap();
    let hinted_room = identity::pair_room_id("A::S1", "A::S9");
    state
        .sessions
        .mutate("A::S1", |s| {
            s.room_id.clone_from(&hinted_room);
            Ok(())
        })
        .await
        .unwrap();

    let s1 = assign(&state, "A::S1", &by_key("A::S2")).await.unwrap();
    assert_eq!(s1.room_id, hinted_room);
    assert_eq!(find(&state, "A::S2").await.room_id, hinted_room);
}

#[tokio::test]
async fn assign_repairs_and_unlinks_previous_partners() {
    let state = test_app_state().await;
    for id in ["S1", "S2", "S3", "S4"] {
        ensure(&state, "A", id, id).await.unwrap();
    }
    assign(&state, "A::S1", &by_key("A::S2")).await.unwrap();
    assign(&state, "A::S3", &by_key("A::S4")).await.unwrap();

    // S1 takes S3; S2 and S4 are left alone.
    assign(&state, "A::S1", &by_key("A::S3")).await.unwrap();

    let s1 = find(&state, "A::S1").await;
    let s3 = find(&state, "A::S3").await;
    assert!(s1.points_at(&s3) && s3.points_at(&s1));
    assert_eq!(s1.room_id, s3.room_id);
    for orphan in ["A::S2", "A::S4"] {
        let session = find(&state, orphan).await;
        assert!(session.partner_participant_id.is_none(), "{orphan}");
        assert!(!identity::is_pair_room(&session.room_id), "{orphan}");
    }
}

#[tokio::test]
async fn assign_to_unstarted_partner_stores_hint_only() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();

    let s1 = assign(&state, "A::S1", &by_id("S2", Some("Lee"))).await.unwrap();
    assert_eq!(s1.partner_participant_id.as_deref(), Some("S2"));
    assert_eq!(s1.partner_name.as_deref(), Some("Lee"));
    assert_eq!(s1.room_id, identity::solo_room_id("A", "S1").unwrap());
    assert!(state.sessions.find("A::S2").await.is_none());

    // The hint turns into a link when the partner starts.
    let s2 = ensure(&state, "A", "S2", "Lee").await.unwrap();
    assert_eq!(s2.partner_participant_id.as_deref(), Some("S1"));
    assert_eq!(find(&state, "A::S1").await.room_id, s2.room_id);
}

#[tokio::test]
async fn assign_hint_in_non_peer_group_resolves_when_partner_starts() {
    let state = test_app_state().await;
    ensure(&state, "C", "S1", "Kim").await.unwrap();
    assign(&state, "C::S1", &by_id("S2", Some("Lee"))).await.unwrap();

    let s2 = ensure(&state, "C", "S2", "Lee").await.unwrap();
    let s1 = find(&state, "C::S1").await;
    assert_eq!(s2.partner_participant_id.as_deref(), Some("S1"));
    assert!(s1.points_at(&s2) && s2.points_at(&s1));
    assert_eq!(s1.room_id, s2.room_id);
    assert!(identity::is_pair_room(&s2.room_id));
}

#[tokio::test]
async fn assign_hint_releases_previous_partner() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();
    ensure(&state, "A", "S2", "Lee").await.unwrap();
    assign(&state, "A::S1", &by_key("A::S2")).await.unwrap();

    let s1 = assign(&state, "A::S1", &by_id("S5", None)).await.unwrap();
    assert_eq!(s1.room_id, identity::solo_room_id("A", "S1").unwrap());
    assert!(find(&state, "A::S2").await.partner_participant_id.is_none());
}

#[tokio::test]
async fn assign_validation_failures() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();
    ensure(&state, "B", "S2", "Lee").await.unwrap();

    let cases = [
        AssignRequest::default(),
        by_key("  "),
        by_key("A::S1"),
        by_id("S1", None),
        by_key("B::S2"),
        by_key("garbage"),
    ];
    for request in &cases {
        let result = assign(&state, "A::S1", request).await;
        assert!(matches!(result, Err(SessionError::Validation(_))), "{request:?}");
    }
    assert!(find(&state, "A::S1").await.partner_participant_id.is_none());
}

#[tokio::test]
async fn assign_unknown_session_is_not_found() {
    let state = test_app_state().await;
    let result = assign(&state, "A::nobody", &by_id("S2", None)).await;
    assert!(matches!(result, Err(SessionError::NotFound(_))));
}

// =============================================================================
// CLEAR
// =============================================================================

#[tokio::test]
async fn clear_unlinks_both_sides_and_restores_solo_rooms() {
    let state = test_app_state().await;
    ensure(&state, "A", "S1", "Kim").await.unwrap();
    ensure(&state, "A", "S2", "Lee").await.unwrap();
    assign(&state, "A::S1", &by_key("A::S2")).await.unwrap();

    let s1 = clear(&state, "A::S1").await.unwrap();
    let s2 = find(&state, "A::S2").await;

    assert!(s1.partner_participant_id.is_none() && s1.partner_name.is_none());
    assert!(s2.partner_participant_id.is_none() && s2.partner_name.is_none());
    assert_eq!(s1.room_id, identity::solo_room_id("A", "S1").unwrap());
    assert_eq!(s2.room_id, identity::solo_room_id("A", "S2").unwrap());
}

#[tokio::test]
async fn clear_is_one_sided_when_partner_does_not_point_back() {
    let state = test_app_state().await;
    for id in ["S1", "S2", "S3"] {
        ensure(&state, "A", id, id).await.unwrap();
    }
    assign(&state, "A::S2", &by_key("A::S3")).await.unwrap();
    state
        .sessions
        .mutate("A::S1", |s| {
            s.partner_participant_id = Some("S2".into());
            Ok(())
        })
        .await
        .unwrap();

    clear(&state, "A::S1").await.unwrap();
    assert_eq!(find(&state, "A::S2").await.partner_participant_id.as_deref(), Some("S3"));
}

#[tokio::test]
async fn clear_without_partner_is_noop() {
    let state = test_app_state().await;
    let before = ensure(&state, "A", "S1", "Kim").await.unwrap();
    let after = clear(&state, "A::S1").await.unwrap();
    assert_eq!(after.room_id, before.room_id);
    assert!(after.partner_participant_id.is_none());
}

#[tokio::test]
async fn concurrent_cross_assignments_keep_links_symmetric() {
    let state = test_app_state().await;
    for id in ["S1", "S2", "S3"] {
        ensure(&state, "A", id, id).await.unwrap();
    }

    let mut tasks = Vec::new();
    for (from, to) in [("A::S1", "A::S2"), ("A::S2", "A::S3"), ("A::S3", "A::S1")] {
        let state = state.clone();
        tasks.push(tokio::spawn(async move { assign(&state, from, &by_key(to)).await.unwrap() }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for session in state.sessions.list(Some("A")).await {
        if let Some(key) = session.partner_key() {
            let other = find(&state, &key).await;
            assert!(other.points_at(&session), "{} -> {key} is one-sided", session.session_key);
            assert_eq!(other.room_id, session.room_id);
        }
    }
}
