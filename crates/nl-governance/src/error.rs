// error.rs — Error types for run governance and approval workflows.
//
// Every variant carries a stable machine-readable code (`code()`) and an
// `ErrorKind` so the transport layer can map it to a response without
// string matching. Ledger failures pass through unchanged.

use std::fmt;

use nl_ledger::{ErrorKind, LedgerError};
use thiserror::Error;

use crate::approval::ResolutionOutcome;
use crate::projector::InconsistentRunState;
use crate::rules::RuleViolation;

/// Which identifier an approval lookup used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey {
    EventId,
    DecisionId,
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupKey::EventId => write!(f, "event_id"),
            LookupKey::DecisionId => write!(f, "decision_id"),
        }
    }
}

/// Why an approval was considered a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// A pending request for the same decision is still open.
    Pending,
    /// The approval was already resolved.
    Resolved,
    /// The ledger already holds the record this operation would create.
    Exists,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicateReason::Pending => write!(f, "is already pending"),
            DuplicateReason::Resolved => write!(f, "has already been resolved"),
            DuplicateReason::Exists => write!(f, "already exists"),
        }
    }
}

/// Errors that can occur during governance operations.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// Schema, duplicate-event, chain, or storage failure from the ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The candidate event breaks one or more workflow rules.
    #[error("event payload violates workflow governance rules ({} violation(s))", .0.len())]
    BusinessRule(Vec<RuleViolation>),

    /// The run's recorded history violates the status state machine.
    #[error(transparent)]
    InconsistentRunState(#[from] InconsistentRunState),

    /// The run has no events.
    #[error("no events found for run '{0}'")]
    RunNotFound(String),

    /// No ledger event matches the approval identifier.
    #[error("approval {key} '{id}' was not found")]
    ApprovalNotFound { id: String, key: LookupKey },

    /// The identifier matches events in more than one place.
    #[error("event ID '{0}' exists in multiple runs")]
    AmbiguousEventId(String),

    /// The target is not the run's currently pending approval.
    #[error("'{0}' is not the currently pending approval")]
    NoPendingApproval(String),

    /// The approval was already registered or resolved.
    #[error("approval '{id}' {reason}")]
    DuplicateApproval { id: String, reason: DuplicateReason },

    /// A decision id is spread across runs, so there is no single chain to export.
    #[error("decision '{decision_id}' spans multiple runs ({}) and cannot be exported deterministically", run_ids.join(", "))]
    CrossRunDecision {
        decision_id: String,
        run_ids: Vec<String>,
    },

    /// The resolution was recorded, but the post-approval continuation failed.
    #[error("post-approval continuation failed after resolution '{}': {source}", resolution.event_id)]
    ContinuationFailed {
        resolution: Box<ResolutionOutcome>,
        #[source]
        source: Box<GovernanceError>,
    },
}

impl GovernanceError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            GovernanceError::Ledger(err) => err.code(),
            GovernanceError::BusinessRule(_) => "BUSINESS_RULE_VIOLATION",
            GovernanceError::InconsistentRunState(err) => err.code.as_str(),
            GovernanceError::RunNotFound(_) => "RUN_NOT_FOUND",
            GovernanceError::ApprovalNotFound { .. } => "APPROVAL_NOT_FOUND",
            GovernanceError::AmbiguousEventId(_) => "AMBIGUOUS_EVENT_ID",
            GovernanceError::NoPendingApproval(_) => "NO_PENDING_APPROVAL",
            GovernanceError::DuplicateApproval { .. } => "DUPLICATE_APPROVAL",
            GovernanceError::CrossRunDecision { .. } => "CROSS_RUN_DECISION_TRACE",
            GovernanceError::ContinuationFailed { .. } => "STORAGE_WRITE_ERROR",
        }
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::Ledger(err) => err.kind(),
            GovernanceError::InconsistentRunState(_) | GovernanceError::CrossRunDecision { .. } => {
                ErrorKind::Consistency
            }
            GovernanceError::ContinuationFailed { .. } => ErrorKind::Storage,
            GovernanceError::BusinessRule(_)
            | GovernanceError::RunNotFound(_)
            | GovernanceError::ApprovalNotFound { .. }
            | GovernanceError::AmbiguousEventId(_)
            | GovernanceError::NoPendingApproval(_)
            | GovernanceError::DuplicateApproval { .. } => ErrorKind::Caller,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_not_found_names_the_lookup_key() {
        let err = GovernanceError::ApprovalNotFound {
            id: "dec_1".to_string(),
            key: LookupKey::DecisionId,
        };
        assert_eq!(err.to_string(), "approval decision_id 'dec_1' was not found");
        assert_eq!(err.kind(), ErrorKind::Caller);
    }

    #[test]
    fn duplicate_messages_distinguish_reason() {
        let pending = GovernanceError::DuplicateApproval {
            id: "dec_1".to_string(),
            reason: DuplicateReason::Pending,
        };
        let resolved = GovernanceError::DuplicateApproval {
            id: "dec_1".to_string(),
            reason: DuplicateReason::Resolved,
        };
        assert_eq!(pending.to_string(), "approval 'dec_1' is already pending");
        assert_eq!(resolved.to_string(), "approval 'dec_1' has already been resolved");
        assert_eq!(pending.code(), "DUPLICATE_APPROVAL");
    }

    #[test]
    fn ledger_errors_keep_their_code() {
        let err: GovernanceError = LedgerError::DuplicateEvent {
            event_id: "e".to_string(),
            run_id: "r".to_string(),
        }
        .into();
        assert_eq!(err.code(), "DUPLICATE_EVENT_ID");
        assert_eq!(err.kind(), ErrorKind::Caller);
    }
}
