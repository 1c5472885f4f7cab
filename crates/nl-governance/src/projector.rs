// projector.rs — Run status projection.
//
// A run's status is never stored; it is recomputed by folding the run's
// events in ledger order:
//
//   Running ──pending──> Paused ──resolution──> Approved ──next event──> Running
//                                     │
//                                     └────────> Rejected ──terminal──> Stopped
//
// A terminal marker (Completed, Stopped, Expired) ends the run from any state.
// History that breaks the state machine is reported, never repaired.

use std::fmt;

use chrono::{DateTime, Utc};
use nl_ledger::event::timestamp;
use nl_ledger::{ApprovalStatus, Event, EventType, StoredEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Derived status of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Waiting on a human approval.
    Paused,
    Approved,
    /// Must be followed immediately by a terminal stop.
    Rejected,
    Stopped,
    Expired,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Approved => "approved",
            RunStatus::Rejected => "rejected",
            RunStatus::Stopped => "stopped",
            RunStatus::Expired => "expired",
            RunStatus::Completed => "completed",
        }
    }

    /// Terminal statuses accept no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Stopped | RunStatus::Expired | RunStatus::Completed
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context of the single unresolved approval request of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingApproval {
    pub event_id: String,
    pub requested_by: Option<String>,
    #[serde(with = "timestamp")]
    pub requested_at: DateTime<Utc>,
    /// The request's explicit reason, or its details text when none was given.
    pub reason: String,
}

/// The result of folding a run's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStatusProjection {
    pub status: RunStatus,
    pub pending_approval: Option<PendingApproval>,
}

impl Default for RunStatusProjection {
    fn default() -> Self {
        Self {
            status: RunStatus::Running,
            pending_approval: None,
        }
    }
}

/// Which state-machine rule a run's history breaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateConflict {
    TerminalStateConflict,
    RejectedStateConflict,
    InvalidApprovalTransition,
    NoPendingApproval,
    MissingApproverId,
    MissingApprovalTimestamp,
    DuplicatePendingApproval,
}

impl StateConflict {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateConflict::TerminalStateConflict => "TERMINAL_STATE_CONFLICT",
            StateConflict::RejectedStateConflict => "REJECTED_STATE_CONFLICT",
            StateConflict::InvalidApprovalTransition => "INVALID_APPROVAL_TRANSITION",
            StateConflict::NoPendingApproval => "NO_PENDING_APPROVAL",
            StateConflict::MissingApproverId => "MISSING_APPROVER_ID",
            StateConflict::MissingApprovalTimestamp => "MISSING_APPROVAL_TIMESTAMP",
            StateConflict::DuplicatePendingApproval => "DUPLICATE_PENDING_APPROVAL",
        }
    }
}

impl fmt::Display for StateConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run's own history violates the status state machine.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("inconsistent run state at event '{event_id}' ({code}): {message}")]
pub struct InconsistentRunState {
    /// Event field the conflict was detected on.
    pub path: String,
    pub message: String,
    pub code: StateConflict,
    pub event_id: String,
}

impl InconsistentRunState {
    fn new(event: &Event, path: &str, code: StateConflict, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
            code,
            event_id: event.id.clone(),
        }
    }
}

/// Terminal status an event forces, if it is a terminal marker.
pub fn terminal_status(event: &Event) -> Option<RunStatus> {
    if event.event_type == EventType::Summary {
        return Some(RunStatus::Completed);
    }
    match event.step()? {
        "run_expired" | "approval_expired" => Some(RunStatus::Expired),
        "run_stopped" | "approval_rejected" => Some(RunStatus::Stopped),
        _ => None,
    }
}

/// Fold a run's events, given in ledger order, into its current status.
pub fn project_run_status(
    events: &[StoredEvent],
) -> Result<RunStatusProjection, InconsistentRunState> {
    project_events(events.iter().map(|stored| &stored.event))
}

/// Fold bare events, given in ledger order. Used to project a history that
/// includes a candidate event not yet appended.
pub fn project_events<'a, I>(events: I) -> Result<RunStatusProjection, InconsistentRunState>
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .try_fold(RunStatusProjection::default(), apply)
}

fn apply(
    mut projection: RunStatusProjection,
    event: &Event,
) -> Result<RunStatusProjection, InconsistentRunState> {
    if projection.status.is_terminal() {
        return Err(InconsistentRunState::new(
            event,
            "type",
            StateConflict::TerminalStateConflict,
            format!(
                "run is already {}; no further events are allowed",
                projection.status
            ),
        ));
    }

    let terminal = terminal_status(event);

    if projection.status == RunStatus::Rejected && terminal.is_none() {
        return Err(InconsistentRunState::new(
            event,
            "type",
            StateConflict::RejectedStateConflict,
            "a rejected approval must be followed by a terminal stop",
        ));
    }

    if let Some(status) = terminal {
        projection.status = status;
        projection.pending_approval = None;
        return Ok(projection);
    }

    if event.is_resolution_signal() {
        let status = match event.approval.status {
            ApprovalStatus::Approved => RunStatus::Approved,
            ApprovalStatus::Rejected => RunStatus::Rejected,
            other => {
                return Err(InconsistentRunState::new(
                    event,
                    "approval.status",
                    StateConflict::InvalidApprovalTransition,
                    format!("approval resolution must be approved or rejected, got {other}"),
                ))
            }
        };
        if projection.pending_approval.is_none() {
            return Err(InconsistentRunState::new(
                event,
                "approval",
                StateConflict::NoPendingApproval,
                "approval resolution has no pending approval to resolve",
            ));
        }
        if is_blank(event.approval.resolved_by.as_deref()) {
            return Err(InconsistentRunState::new(
                event,
                "approval.resolved_by",
                StateConflict::MissingApproverId,
                "approval resolution requires resolved_by",
            ));
        }
        if event.approval.resolved_at.is_none() {
            return Err(InconsistentRunState::new(
                event,
                "approval.resolved_at",
                StateConflict::MissingApprovalTimestamp,
                "approval resolution requires resolved_at",
            ));
        }
        projection.status = status;
        projection.pending_approval = None;
        return Ok(projection);
    }

    if event.is_pending_signal() {
        if let Some(pending) = &projection.pending_approval {
            return Err(InconsistentRunState::new(
                event,
                "approval.status",
                StateConflict::DuplicatePendingApproval,
                format!(
                    "approval '{}' is still pending; only one may be open per run",
                    pending.event_id
                ),
            ));
        }
        let reason = event
            .approval
            .reason
            .as_deref()
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or(&event.details)
            .to_string();
        projection.pending_approval = Some(PendingApproval {
            event_id: event.id.clone(),
            requested_by: event.approval.requested_by.clone(),
            requested_at: event.timestamp,
            reason,
        });
        projection.status = RunStatus::Paused;
        return Ok(projection);
    }

    if projection.pending_approval.is_some() {
        projection.status = RunStatus::Paused;
    } else if projection.status == RunStatus::Approved {
        projection.status = RunStatus::Running;
    }
    Ok(projection)
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
