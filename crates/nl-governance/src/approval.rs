// approval.rs — Approval registration, resolution, and read models.
//
// An approval is identified two ways: by the ledger event id of its pending
// request, or by the upstream `decision_id` that correlates ledger events to
// one policy decision. Both paths end at the same resolution logic, which
// appends exactly one `approval_resolved` event per request.
//
// Lookups and appends happen under the ledger's write lock, so two callers
// racing to resolve the same request cannot both succeed.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use nl_ledger::event::timestamp;
use nl_ledger::{
    Actor, Approval, ApprovalStatus, Event, EventStore, EventType, Evidence, EvidenceKind,
    LedgerError, RiskLevel, StoredEvent,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::continuation::{ContinuationContext, ContinuationRegistry};
use crate::error::{DuplicateReason, GovernanceError, LookupKey};
use crate::ledger::{Ledger, LedgerWriter};
use crate::projector::{project_run_status, RunStatus};

/// Workflow id stamped on events the approval workflow writes itself.
pub const APPROVAL_GATE_WORKFLOW: &str = "approval_gate";

/// A human's answer to an approval request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }

    pub fn approval_status(&self) -> ApprovalStatus {
        match self {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
        }
    }

    fn step(&self) -> &'static str {
        match self {
            Decision::Approved => "approval_approved",
            Decision::Rejected => "approval_rejected",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Decision::Approved),
            "rejected" | "reject" => Ok(Decision::Rejected),
            other => Err(format!("unknown decision '{other}' (expected approved or rejected)")),
        }
    }
}

/// How the caller identifies the approval to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalTarget {
    EventId(String),
    DecisionId(String),
}

/// Input for registering a new pending approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequest {
    pub decision_id: String,
    pub run_id: String,
    pub requested_by: String,
    pub title: String,
    pub details: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Input for resolving an approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    pub approver_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Resolution {
    pub fn new(decision: Decision, approver_id: impl Into<String>) -> Self {
        Self {
            decision,
            approver_id: approver_id.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A newly registered pending approval.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegisteredApproval {
    pub decision_id: String,
    pub event_id: String,
    pub run_id: String,
    pub approval_status: ApprovalStatus,
    #[serde(with = "timestamp")]
    pub requested_at: DateTime<Utc>,
}

/// The result of a successful resolution.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolutionOutcome {
    /// Id of the appended `approval_resolved` event.
    pub event_id: String,
    pub target_event_id: String,
    pub decision_id: Option<String>,
    pub run_id: String,
    pub decision: Decision,
    #[serde(with = "timestamp")]
    pub resolved_at: DateTime<Utc>,
    /// Status after the resolution and any continuation.
    pub run_status: RunStatus,
    pub continuation_event_ids: Vec<String>,
    /// E.g. `paused->approved`.
    pub state_transition: String,
}

/// Lifecycle of one policy decision, rebuilt from the ledger.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApprovalDecisionState {
    pub decision_id: String,
    pub run_id: String,
    pub status: ApprovalStatus,
    pub requested_event_id: Option<String>,
    pub resolved_event_id: Option<String>,
    #[serde(with = "timestamp::option")]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp::option")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub requested_by: Option<String>,
    pub resolved_by: Option<String>,
    pub reason: Option<String>,
}

/// One open approval, as listed for an operator inbox.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingApprovalSummary {
    pub event_id: String,
    pub decision_id: Option<String>,
    pub run_id: String,
    #[serde(with = "timestamp")]
    pub requested_at: DateTime<Utc>,
    pub requested_by: Option<String>,
    pub title: String,
    pub details: String,
    pub reason: String,
    pub risk_level: Option<RiskLevel>,
}

/// Drives approvals through the gated ledger.
pub struct ApprovalWorkflow {
    ledger: Arc<Ledger>,
    continuations: ContinuationRegistry,
}

impl ApprovalWorkflow {
    /// Workflow with the built-in continuations registered.
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self::with_continuations(ledger, ContinuationRegistry::with_defaults())
    }

    pub fn with_continuations(ledger: Arc<Ledger>, continuations: ContinuationRegistry) -> Self {
        Self {
            ledger,
            continuations,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Append a new pending approval request for `request.decision_id`.
    ///
    /// Fails with `DuplicateApproval` if any pending or resolution event
    /// already carries the decision id.
    pub fn register_pending_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<RegisteredApproval, GovernanceError> {
        let decision_id = request.decision_id.trim();
        if decision_id.is_empty() {
            return Err(LedgerError::SchemaValidation(vec![nl_ledger::ValidationDetail::new(
                "decision_id",
                "decision_id must not be empty",
                "MISSING_DECISION_ID",
            )])
            .into());
        }

        let writer = self.ledger.writer()?;
        let store = writer.store();

        let last_signal = store
            .list_all()?
            .into_iter()
            .filter(|stored| stored.event.decision_id() == Some(decision_id))
            .filter(|stored| stored.event.is_pending_signal() || stored.event.is_resolution_signal())
            .last();
        if let Some(signal) = last_signal {
            let reason = if signal.event.is_pending_signal() {
                DuplicateReason::Pending
            } else {
                DuplicateReason::Resolved
            };
            return Err(GovernanceError::DuplicateApproval {
                id: decision_id.to_string(),
                reason,
            });
        }

        let run_events = store.list_by_run_id(request.run_id.trim())?;
        let requested_at = next_timestamp(&run_events);
        let event_id = format!(
            "evt_{decision_id}_pending_{}_{}",
            compact_timestamp(&requested_at),
            short_token()
        );

        let mut approval = Approval::pending(request.requested_by.clone()).with_decision_id(decision_id);
        approval.reason = request.reason.clone();
        let event = Event::new(
            event_id,
            request.run_id.clone(),
            requested_at,
            EventType::ApprovalRequested,
            Actor::Agent,
            request.title.clone(),
            request.details.clone(),
        )
        .with_risk_level(request.risk_level)
        .with_requires_approval(true)
        .with_approval(approval)
        .with_meta(APPROVAL_GATE_WORKFLOW, "approval_requested");

        let stored = writer.submit(event).map_err(|err| match err {
            GovernanceError::Ledger(LedgerError::DuplicateEvent { .. }) => {
                GovernanceError::DuplicateApproval {
                    id: decision_id.to_string(),
                    reason: DuplicateReason::Exists,
                }
            }
            other => other,
        })?;

        info!(
            decision_id,
            run_id = %stored.event.run_id,
            event_id = %stored.event.id,
            "pending approval registered"
        );
        Ok(RegisteredApproval {
            decision_id: decision_id.to_string(),
            event_id: stored.event.id.clone(),
            run_id: stored.event.run_id.clone(),
            approval_status: stored.event.approval.status,
            requested_at: stored.event.timestamp,
        })
    }

    /// Resolve the pending approval request with ledger id `event_id`.
    pub fn resolve_pending_approval(
        &self,
        event_id: &str,
        resolution: &Resolution,
    ) -> Result<ResolutionOutcome, GovernanceError> {
        self.resolve(&ApprovalTarget::EventId(event_id.to_string()), resolution)
    }

    /// Resolve the single pending request carrying `decision_id`.
    pub fn resolve_pending_approval_by_decision_id(
        &self,
        decision_id: &str,
        resolution: &Resolution,
    ) -> Result<ResolutionOutcome, GovernanceError> {
        self.resolve(
            &ApprovalTarget::DecisionId(decision_id.to_string()),
            resolution,
        )
    }

    /// Resolve an approval identified either way.
    pub fn resolve(
        &self,
        target: &ApprovalTarget,
        resolution: &Resolution,
    ) -> Result<ResolutionOutcome, GovernanceError> {
        let writer = self.ledger.writer()?;
        let event_id = match target {
            ApprovalTarget::EventId(id) => id.trim().to_string(),
            ApprovalTarget::DecisionId(decision_id) => {
                pending_event_for_decision(writer.store(), decision_id.trim())?
            }
        };
        self.resolve_event(&writer, &event_id, resolution)
    }

    fn resolve_event(
        &self,
        writer: &LedgerWriter<'_>,
        event_id: &str,
        resolution: &Resolution,
    ) -> Result<ResolutionOutcome, GovernanceError> {
        let store = writer.store();
        let mut matches = store
            .list_all()?
            .into_iter()
            .filter(|stored| stored.event.id == event_id);
        let target = match (matches.next(), matches.next()) {
            (None, _) => {
                return Err(GovernanceError::ApprovalNotFound {
                    id: event_id.to_string(),
                    key: LookupKey::EventId,
                })
            }
            (Some(_), Some(_)) => return Err(GovernanceError::AmbiguousEventId(event_id.to_string())),
            (Some(target), None) => target,
        };

        if !target.event.is_pending_signal() {
            return Err(GovernanceError::NoPendingApproval(event_id.to_string()));
        }

        let run_events = store.list_by_run_id(target.run_id())?;
        if was_resolved(&run_events, event_id) {
            return Err(GovernanceError::DuplicateApproval {
                id: event_id.to_string(),
                reason: DuplicateReason::Resolved,
            });
        }

        let projection = project_run_status(&run_events)?;
        let is_active = projection.status == RunStatus::Paused
            && projection
                .pending_approval
                .as_ref()
                .is_some_and(|pending| pending.event_id == event_id);
        if !is_active {
            return Err(GovernanceError::NoPendingApproval(event_id.to_string()));
        }

        let resolved = writer.submit(resolution_event(&target, &run_events, resolution))?;
        info!(
            run_id = %resolved.event.run_id,
            target_event_id = event_id,
            event_id = %resolved.event.id,
            decision = %resolution.decision,
            approver = %resolution.approver_id,
            "approval resolved"
        );

        let mut outcome = ResolutionOutcome {
            event_id: resolved.event.id.clone(),
            target_event_id: event_id.to_string(),
            decision_id: target.event.decision_id().map(str::to_string),
            run_id: resolved.event.run_id.clone(),
            decision: resolution.decision,
            resolved_at: resolved.event.timestamp,
            run_status: projection.status,
            continuation_event_ids: Vec::new(),
            state_transition: String::new(),
        };

        if resolution.decision == Decision::Approved {
            if let Err(err) = self.continue_after_approval(writer, &target, &resolved, &mut outcome) {
                self.journal_continuation_failure(writer, &target, &err);
                self.finish_outcome(store, &mut outcome, projection.status);
                return Err(GovernanceError::ContinuationFailed {
                    resolution: Box::new(outcome),
                    source: Box::new(err),
                });
            }
        }

        self.finish_outcome(store, &mut outcome, projection.status);
        Ok(outcome)
    }

    /// Append the follow-on events registered for the request's workflow.
    fn continue_after_approval(
        &self,
        writer: &LedgerWriter<'_>,
        request: &StoredEvent,
        resolved: &StoredEvent,
        outcome: &mut ResolutionOutcome,
    ) -> Result<(), GovernanceError> {
        let Some(strategy) = request.event.workflow().and_then(|wf| self.continuations.get(wf)) else {
            return Ok(());
        };
        let ctx = ContinuationContext {
            request,
            resolution: resolved,
        };
        for event in strategy.follow_up(&ctx) {
            let stored = writer.submit(event)?;
            outcome.continuation_event_ids.push(stored.event.id);
        }
        Ok(())
    }

    /// Record a continuation failure in the run.
    ///
    /// Best effort: if this append fails too, the failure is logged and the
    /// caller still receives the original continuation error.
    fn journal_continuation_failure(
        &self,
        writer: &LedgerWriter<'_>,
        request: &StoredEvent,
        err: &GovernanceError,
    ) {
        let workflow = request.event.workflow().unwrap_or(APPROVAL_GATE_WORKFLOW);
        let run_events = match writer.store().list_by_run_id(request.run_id()) {
            Ok(events) => events,
            Err(journal_err) => {
                warn!(run_id = %request.run_id(), error = %journal_err, "could not read run to journal continuation failure");
                return;
            }
        };
        let event = Event::new(
            format!("evt_{workflow}_continuation_error_{}", short_token()),
            request.run_id(),
            next_timestamp(&run_events),
            EventType::Error,
            Actor::System,
            "Post-approval continuation failed",
            format!("Continuation after approval '{}' failed: {err}", request.id()),
        )
        .with_risk_level(RiskLevel::High)
        .with_evidence(Evidence::new(
            EvidenceKind::Log,
            "Continuation error",
            format!("ledger://{}/{}", request.run_id(), request.id()),
        ))
        .with_meta(workflow, "run_stopped");

        if let Err(journal_err) = writer.submit(event) {
            warn!(
                run_id = %request.run_id(),
                error = %journal_err,
                "could not journal continuation failure"
            );
        }
    }

    /// Fill in the run's status after the resolution. The resolution is
    /// already appended, so a failed re-read is logged and the outcome keeps
    /// the status seen before it.
    fn finish_outcome(&self, store: &dyn EventStore, outcome: &mut ResolutionOutcome, before: RunStatus) {
        let after = match store
            .list_by_run_id(&outcome.run_id)
            .map_err(GovernanceError::from)
            .and_then(|events| project_run_status(&events).map_err(GovernanceError::from))
        {
            Ok(projection) => projection.status,
            Err(err) => {
                warn!(
                    run_id = %outcome.run_id,
                    event_id = %outcome.event_id,
                    error = %err,
                    "could not project run status after resolution"
                );
                before
            }
        };
        outcome.run_status = after;
        outcome.state_transition = format!("{before}->{after}");
    }

    /// Lifecycle of `decision_id`: the resolution wins over the request when both exist.
    pub fn approval_decision_state(
        &self,
        decision_id: &str,
    ) -> Result<ApprovalDecisionState, GovernanceError> {
        let decision_id = decision_id.trim();
        let events: Vec<StoredEvent> = self
            .ledger
            .store()
            .list_all()?
            .into_iter()
            .filter(|stored| stored.event.decision_id() == Some(decision_id))
            .collect();

        let not_found = || GovernanceError::ApprovalNotFound {
            id: decision_id.to_string(),
            key: LookupKey::DecisionId,
        };
        let last = events.last().ok_or_else(not_found)?;
        let requested = events.iter().find(|stored| stored.event.is_pending_signal());
        let resolved = events.iter().rev().find(|stored| stored.event.is_resolution_signal());
        let anchor = resolved.or(requested).unwrap_or(last);

        Ok(ApprovalDecisionState {
            decision_id: decision_id.to_string(),
            run_id: anchor.event.run_id.clone(),
            status: anchor.event.approval.status,
            requested_event_id: requested.map(|e| e.event.id.clone()),
            resolved_event_id: resolved.map(|e| e.event.id.clone()),
            requested_at: requested.map(|e| e.event.timestamp),
            resolved_at: anchor.event.approval.resolved_at,
            requested_by: requested
                .and_then(|e| e.event.approval.requested_by.clone())
                .or_else(|| anchor.event.approval.requested_by.clone()),
            resolved_by: anchor.event.approval.resolved_by.clone(),
            reason: anchor.event.approval.reason.clone(),
        })
    }

    /// Every run currently paused on an approval, oldest request first.
    pub fn list_pending_approvals(&self) -> Result<Vec<PendingApprovalSummary>, GovernanceError> {
        let store = self.ledger.store();
        let run_ids: BTreeSet<String> = store
            .list_all()?
            .into_iter()
            .map(|stored| stored.event.run_id)
            .collect();

        let mut pending = Vec::new();
        for run_id in run_ids {
            let events = store.list_by_run_id(&run_id)?;
            let projection = project_run_status(&events)?;
            let Some(open) = projection.pending_approval else {
                continue;
            };
            if projection.status != RunStatus::Paused {
                continue;
            }
            let Some(request) = events.iter().find(|stored| stored.event.id == open.event_id) else {
                continue;
            };
            pending.push(PendingApprovalSummary {
                event_id: open.event_id,
                decision_id: request.event.decision_id().map(str::to_string),
                run_id,
                requested_at: open.requested_at,
                requested_by: open.requested_by,
                title: request.event.title.clone(),
                details: request.event.details.clone(),
                reason: open.reason,
                risk_level: request.event.risk_level,
            });
        }
        pending.sort_by(|a, b| {
            a.requested_at
                .cmp(&b.requested_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        Ok(pending)
    }
}

/// The ledger id of the one open request carrying `decision_id`.
fn pending_event_for_decision(
    store: &dyn EventStore,
    decision_id: &str,
) -> Result<String, GovernanceError> {
    let events: Vec<StoredEvent> = store
        .list_all()?
        .into_iter()
        .filter(|stored| stored.event.decision_id() == Some(decision_id))
        .collect();
    if events.is_empty() {
        return Err(GovernanceError::ApprovalNotFound {
            id: decision_id.to_string(),
            key: LookupKey::DecisionId,
        });
    }

    let mut pending = events.iter().filter(|stored| stored.event.is_pending_signal());
    match (pending.next(), pending.next()) {
        (None, _) => Err(GovernanceError::NoPendingApproval(decision_id.to_string())),
        (Some(_), Some(_)) => Err(GovernanceError::AmbiguousEventId(decision_id.to_string())),
        (Some(request), None) => Ok(request.event.id.clone()),
    }
}

/// Has the request `event_id` already been answered in this run?
///
/// A resolution answers the request that was open when it was appended, and
/// resolution ids written by this workflow embed their target id.
fn was_resolved(run_events: &[StoredEvent], event_id: &str) -> bool {
    let own_prefix = format!("apr_{event_id}_");
    let mut open: Option<&str> = None;
    for stored in run_events {
        let event = &stored.event;
        if event.is_resolution_signal() {
            if event.id.starts_with(&own_prefix) || open == Some(event_id) {
                return true;
            }
            open = None;
        } else if event.is_pending_signal() {
            open = Some(event.id.as_str());
        }
    }
    false
}

fn resolution_event(
    target: &StoredEvent,
    run_events: &[StoredEvent],
    resolution: &Resolution,
) -> Event {
    let resolved_at = next_timestamp(run_events);
    let event_id = format!(
        "apr_{}_{}_{}_{}",
        target.event.id,
        resolution.decision.as_str(),
        compact_timestamp(&resolved_at),
        short_token()
    );

    let title = match resolution.decision {
        Decision::Approved => "Approval granted",
        Decision::Rejected => "Approval rejected",
    };
    let reason = resolution
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|reason| !reason.is_empty());
    let details = reason.map_or_else(
        || format!("{title} by {}", resolution.approver_id.trim()),
        str::to_string,
    );

    let mut approval = Approval::resolved(
        resolution.decision.approval_status(),
        resolution.approver_id.trim(),
        resolved_at,
    );
    approval.decision_id = target.event.decision_id().map(str::to_string);
    approval.requested_by = target.event.approval.requested_by.clone();
    approval.reason = reason.map(str::to_string);

    let mut event = Event::new(
        event_id,
        target.run_id(),
        resolved_at,
        EventType::ApprovalResolved,
        Actor::Human,
        title,
        details,
    )
    .with_requires_approval(true)
    .with_approval(approval)
    .with_meta(APPROVAL_GATE_WORKFLOW, resolution.decision.step());
    event.confidence = target.event.confidence;
    event.risk_level = target.event.risk_level;
    event
}

/// Now, or 1ms past the run's latest event if the clock would regress.
fn next_timestamp(run_events: &[StoredEvent]) -> DateTime<Utc> {
    let now = Utc::now().trunc_subsecs(6);
    match run_events.iter().map(|stored| stored.event.timestamp).max() {
        Some(latest) if now <= latest => latest + Duration::milliseconds(1),
        _ => now,
    }
}

/// `20260216T130000123456Z` for use inside event ids.
fn compact_timestamp(at: &DateTime<Utc>) -> String {
    timestamp::format(at).replace(['-', ':', '.'], "")
}

fn short_token() -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(8);
    token
}
