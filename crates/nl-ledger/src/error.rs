// error.rs — Error types for the ledger subsystem.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Each variant maps to a specific failure mode in the append/read pipeline
// and carries a stable machine-readable code via `LedgerError::code()`.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad classification of a failure, used by callers to decide how to
/// report it (and whether a retry could ever help).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input or bad request state. Deterministic, never retried.
    Caller,
    /// The backing store failed. The caller may retry.
    Storage,
    /// Recorded history violates an invariant (bug upstream or tampering).
    Consistency,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Caller => write!(f, "caller"),
            ErrorKind::Storage => write!(f, "storage"),
            ErrorKind::Consistency => write!(f, "consistency"),
        }
    }
}

/// One field-level problem found while validating an event payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationDetail {
    /// Dotted field path (e.g., "approval.status"). Empty for whole-payload errors.
    pub path: String,
    /// Human-readable description.
    pub message: String,
    /// Stable machine-readable code (e.g., "MISSING_RUN_ID").
    pub code: String,
}

impl ValidationDetail {
    pub fn new(path: impl Into<String>, message: impl Into<String>, code: &str) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code: code.to_string(),
        }
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The event payload is malformed. All problems are reported together.
    #[error("event payload failed schema validation ({} problem(s))", .0.len())]
    SchemaValidation(Vec<ValidationDetail>),

    /// An event with the same id was already accepted for this run.
    #[error("event ID '{event_id}' already exists for run '{run_id}'")]
    DuplicateEvent { event_id: String, run_id: String },

    /// The per-run hash chain does not recompute; history was altered.
    #[error("hash chain broken for run '{run_id}' at sequence {sequence} (event '{event_id}'): {reason}")]
    ChainBroken {
        run_id: String,
        event_id: String,
        sequence: u64,
        reason: String,
    },

    /// Failed to open or initialize the ledger database.
    #[error("failed to open ledger database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// The SQLite backend rejected a read or write.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to serialize or deserialize an event payload.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A stored row could not be turned back into an event.
    #[error("stored record {sequence} is corrupt: {reason}")]
    CorruptRecord { sequence: u64, reason: String },

    /// A thread panicked while holding the store lock.
    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::SchemaValidation(_) => "SCHEMA_VALIDATION_ERROR",
            LedgerError::DuplicateEvent { .. } => "DUPLICATE_EVENT_ID",
            LedgerError::ChainBroken { .. } => "HASH_CHAIN_BROKEN",
            LedgerError::OpenFailed { .. }
            | LedgerError::Sqlite(_)
            | LedgerError::SerializationError(_)
            | LedgerError::CorruptRecord { .. }
            | LedgerError::LockPoisoned => "STORAGE_ERROR",
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::SchemaValidation(_) | LedgerError::DuplicateEvent { .. } => {
                ErrorKind::Caller
            }
            LedgerError::ChainBroken { .. } => ErrorKind::Consistency,
            _ => ErrorKind::Storage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_event_is_a_caller_error() {
        let err = LedgerError::DuplicateEvent {
            event_id: "evt_1".to_string(),
            run_id: "run_1".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Caller);
        assert_eq!(err.code(), "DUPLICATE_EVENT_ID");
        assert_eq!(
            err.to_string(),
            "event ID 'evt_1' already exists for run 'run_1'"
        );
    }

    #[test]
    fn lock_poisoning_is_a_storage_error() {
        assert_eq!(LedgerError::LockPoisoned.kind(), ErrorKind::Storage);
        assert_eq!(LedgerError::LockPoisoned.code(), "STORAGE_ERROR");
    }
}
