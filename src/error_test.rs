use super::*;

#[test]
fn precondition_message_names_stage_and_missing_content() {
    let err = SessionError::locked(Stage::Final, Prerequisite::Draft);
    let message = err.to_string();
    assert!(message.contains("stage 4"));
    assert!(message.contains("final"));
    assert!(message.contains("draft must be saved"));
}

#[test]
fn guard_errors_are_not_retryable() {
    let errors = [
        SessionError::validation("empty id"),
        SessionError::NotFound("A::S1".into()),
        SessionError::locked(Stage::Draft, Prerequisite::Prewriting),
        SessionError::Conflict("prewriting"),
    ];
    for err in &errors {
        assert!(!err.retryable(), "{err} should not be retryable");
    }
}

#[test]
fn error_codes_are_distinct() {
    let codes = [
        SessionError::validation("x").error_code(),
        SessionError::NotFound("x".into()).error_code(),
        SessionError::locked(Stage::Final, Prerequisite::Notes).error_code(),
        SessionError::Conflict("final").error_code(),
    ];
    for (i, a) in codes.iter().enumerate() {
        for b in &codes[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn storage_io_error_is_retryable() {
    let io = std::io::Error::other("disk on fire");
    let err = SessionError::from(StorageError::from(io));
    assert!(err.retryable());
    assert_eq!(err.error_code(), "E_STORAGE_IO");
}

#[test]
fn conflict_message_names_field() {
    assert_eq!(SessionError::Conflict("final").to_string(), "final already submitted");
}
