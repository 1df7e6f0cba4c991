//! Error taxonomy for session, stage and pairing operations.
//!
//! DESIGN
//! ======
//! Every failure the core can surface maps onto one `SessionError` variant.
//! Guard violations (`Validation`, `NotFound`, `Precondition`, `Conflict`)
//! describe caller mistakes or workflow-state violations and are never
//! retried internally. `Storage` wraps backend failures and is the only
//! class flagged as retryable.

use std::fmt;

use crate::state::Stage;
use crate::storage::StorageError;

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error output.
pub trait ErrorCode: fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// PREREQUISITES
// =============================================================================

/// Content or workflow state that must exist before a stage can be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    Prewriting,
    Draft,
    Notes,
    /// The session must already sit at the peer-notes stage.
    PeerStage,
    /// The session's group has no peer-notes stage at all.
    PeerGroup,
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Prewriting => "prewriting must be submitted first",
            Self::Draft => "draft must be saved first",
            Self::Notes => "peer notes must be saved first",
            Self::PeerStage => "peer stage must be reached first",
            Self::PeerGroup => "group has no peer stage",
        };
        f.write_str(text)
    }
}

// =============================================================================
// SESSION ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("cannot move to {target}: {missing}")]
    Precondition { target: Stage, missing: Prerequisite },
    #[error("{0} already submitted")]
    Conflict(&'static str),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn locked(target: Stage, missing: Prerequisite) -> Self {
        Self::Precondition { target, missing }
    }
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::NotFound(_) => "E_SESSION_NOT_FOUND",
            Self::Precondition { .. } => "E_PRECONDITION",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Storage(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
