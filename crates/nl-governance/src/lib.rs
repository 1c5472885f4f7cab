//! # nl-governance
//!
//! Run status, workflow rules, and approval handling on top of the
//! NightLedger event ledger.
//!
//! A run's status is never stored. It is projected from the run's events,
//! and every write is checked against that projection before it lands.
//!
//! ## Key components
//!
//! - [`project_run_status`] — folds a run's history into a [`RunStatusProjection`]
//!   (Running → Paused → Approved/Rejected → Running, or a terminal
//!   Completed/Stopped/Expired)
//! - [`BusinessRuleGate`] — collects every rule a candidate event breaks
//! - [`Ledger`] — the gated write path: validate, gate, append under one lock
//! - [`ApprovalWorkflow`] — register and resolve approvals by event id or
//!   decision id, with pluggable post-approval [`Continuation`]s
//! - [`export_decision_audit`] — hash-verified trail of one policy decision

pub mod approval;
pub mod audit;
pub mod continuation;
pub mod error;
pub mod ledger;
pub mod projector;
pub mod rules;

pub use approval::{
    ApprovalDecisionState, ApprovalRequest, ApprovalTarget, ApprovalWorkflow, Decision,
    PendingApprovalSummary, RegisteredApproval, Resolution, ResolutionOutcome,
    APPROVAL_GATE_WORKFLOW,
};
pub use audit::{export_decision_audit, AuditEntry, DecisionAudit};
pub use continuation::{
    Continuation, ContinuationContext, ContinuationRegistry, TriageInboxContinuation,
};
pub use error::{DuplicateReason, GovernanceError, LookupKey};
pub use ledger::{Ledger, LedgerWriter};
pub use projector::{
    project_events, project_run_status, terminal_status, InconsistentRunState, PendingApproval, RunStatus,
    RunStatusProjection, StateConflict,
};
pub use rules::{BusinessRuleGate, RuleViolation};
