// rules.rs — Business-rule gate run before every append.
//
// The gate checks a candidate event against the run's existing history and
// collects every violation it finds instead of stopping at the first one.
// Each violation carries a stable rule id so an audit trail can point back at
// the rule that rejected the event.

use nl_ledger::{ApprovalStatus, Event, EventType, RiskLevel, StoredEvent};
use serde::Serialize;

use crate::projector::{
    project_events, project_run_status, InconsistentRunState, RunStatusProjection, StateConflict,
};

pub const RULE_APPROVAL_REQUEST_SHAPE: &str = "RULE-GATE-001";
pub const RULE_PENDING_REQUIRED: &str = "RULE-GATE-002";
pub const RULE_DECISION_ID_MATCH: &str = "RULE-GATE-004";
pub const RULE_TERMINAL_LOCK: &str = "RULE-GATE-005";
pub const RULE_APPROVER_REQUIRED: &str = "RULE-GATE-007";
pub const RULE_APPROVAL_TIMESTAMP_REQUIRED: &str = "RULE-GATE-008";
pub const RULE_SUMMARY_COMPLETION: &str = "RULE-GATE-010";
pub const RULE_RISK_EVIDENCE: &str = "RULE-RISK-005";

/// One broken rule.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuleViolation {
    pub path: String,
    pub message: String,
    pub code: &'static str,
    pub rule_id: &'static str,
}

impl RuleViolation {
    fn new(path: &str, message: impl Into<String>, code: &'static str, rule_id: &'static str) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
            code,
            rule_id,
        }
    }
}

impl From<InconsistentRunState> for RuleViolation {
    fn from(err: InconsistentRunState) -> Self {
        let rule_id = match err.code {
            StateConflict::TerminalStateConflict => RULE_TERMINAL_LOCK,
            StateConflict::DuplicatePendingApproval => RULE_APPROVAL_REQUEST_SHAPE,
            StateConflict::InvalidApprovalTransition => RULE_DECISION_ID_MATCH,
            StateConflict::MissingApproverId => RULE_APPROVER_REQUIRED,
            StateConflict::MissingApprovalTimestamp => RULE_APPROVAL_TIMESTAMP_REQUIRED,
            StateConflict::NoPendingApproval | StateConflict::RejectedStateConflict => {
                RULE_PENDING_REQUIRED
            }
        };
        Self {
            path: err.path,
            message: err.message,
            code: err.code.as_str(),
            rule_id,
        }
    }
}

/// Workflow rules every candidate event must satisfy.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusinessRuleGate;

impl BusinessRuleGate {
    /// Check `candidate` against `existing`, the run's history in ledger order.
    ///
    /// Returns every violation found. If the existing history itself cannot
    /// be projected, that single conflict is returned as the only violation.
    /// When the per-rule checks pass, the history with the candidate placed
    /// where it will be read back must still project cleanly.
    pub fn validate(
        &self,
        candidate: &Event,
        existing: &[StoredEvent],
    ) -> Result<(), Vec<RuleViolation>> {
        let current = project_run_status(existing).map_err(|err| vec![RuleViolation::from(err)])?;
        let mut violations = Vec::new();

        if current.status.is_terminal() {
            violations.push(RuleViolation::new(
                "type",
                format!("run is already {}; no further events are allowed", current.status),
                StateConflict::TerminalStateConflict.as_str(),
                RULE_TERMINAL_LOCK,
            ));
        }

        match candidate.event_type {
            EventType::ApprovalRequested => check_request(candidate, &mut violations),
            EventType::ApprovalResolved => {
                check_resolution(candidate, existing, &current, &mut violations)
            }
            EventType::Summary => check_summary(candidate, &current, &mut violations),
            EventType::Action => check_risky_action(candidate, &mut violations),
            _ => {}
        }

        if violations.is_empty() {
            if let Err(err) = project_with_candidate(candidate, existing) {
                violations.push(RuleViolation::from(err));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

/// Project `existing` with `candidate` inserted at its read position. The
/// candidate gets the next sequence, so it sorts after every event with an
/// equal or earlier timestamp.
fn project_with_candidate(
    candidate: &Event,
    existing: &[StoredEvent],
) -> Result<RunStatusProjection, InconsistentRunState> {
    let position = existing.partition_point(|stored| stored.event.timestamp <= candidate.timestamp);
    let (before, after) = existing.split_at(position);
    project_events(
        before
            .iter()
            .map(|stored| &stored.event)
            .chain(std::iter::once(candidate))
            .chain(after.iter().map(|stored| &stored.event)),
    )
}

fn check_request(candidate: &Event, violations: &mut Vec<RuleViolation>) {
    if !candidate.requires_approval {
        violations.push(RuleViolation::new(
            "requires_approval",
            "approval_requested events must set requires_approval",
            "INVALID_APPROVAL_TRANSITION",
            RULE_APPROVAL_REQUEST_SHAPE,
        ));
    }
    if candidate.approval.status != ApprovalStatus::Pending {
        violations.push(RuleViolation::new(
            "approval.status",
            format!(
                "approval_requested events must be pending, got {}",
                candidate.approval.status
            ),
            "INVALID_APPROVAL_TRANSITION",
            RULE_APPROVAL_REQUEST_SHAPE,
        ));
    }
}

fn check_resolution(
    candidate: &Event,
    existing: &[StoredEvent],
    projection: &RunStatusProjection,
    violations: &mut Vec<RuleViolation>,
) {
    match &projection.pending_approval {
        None => violations.push(RuleViolation::new(
            "approval",
            "approval_resolved requires a pending approval in the run",
            "NO_PENDING_APPROVAL",
            RULE_PENDING_REQUIRED,
        )),
        Some(pending) => {
            let expected = existing
                .iter()
                .find(|stored| stored.event.id == pending.event_id)
                .and_then(|stored| stored.event.decision_id());
            if let Some(expected) = expected {
                if candidate.decision_id() != Some(expected) {
                    violations.push(RuleViolation::new(
                        "approval.decision_id",
                        format!(
                            "approval_resolved decision_id must match pending decision '{expected}'"
                        ),
                        "APPROVAL_DECISION_ID_MISMATCH",
                        RULE_DECISION_ID_MATCH,
                    ));
                }
            }
        }
    }

    let approver_missing = candidate
        .approval
        .resolved_by
        .as_deref()
        .map_or(true, |by| by.trim().is_empty());
    if approver_missing {
        violations.push(RuleViolation::new(
            "approval.resolved_by",
            "approval_resolved requires resolved_by",
            "MISSING_APPROVER_ID",
            RULE_APPROVER_REQUIRED,
        ));
    }
    if candidate.approval.resolved_at.is_none() {
        violations.push(RuleViolation::new(
            "approval.resolved_at",
            "approval_resolved requires resolved_at",
            "MISSING_APPROVAL_TIMESTAMP",
            RULE_APPROVAL_TIMESTAMP_REQUIRED,
        ));
    }
}

fn check_summary(
    candidate: &Event,
    projection: &RunStatusProjection,
    violations: &mut Vec<RuleViolation>,
) {
    if candidate.requires_approval || candidate.approval.status != ApprovalStatus::NotRequired {
        violations.push(RuleViolation::new(
            "approval",
            "summary events must not require approval",
            "INVALID_SUMMARY_COMPLETION",
            RULE_SUMMARY_COMPLETION,
        ));
    }
    if let Some(pending) = &projection.pending_approval {
        violations.push(RuleViolation::new(
            "type",
            format!(
                "run cannot complete while approval '{}' is pending",
                pending.event_id
            ),
            "PENDING_APPROVAL_EXISTS",
            RULE_SUMMARY_COMPLETION,
        ));
    }
}

fn check_risky_action(candidate: &Event, violations: &mut Vec<RuleViolation>) {
    let risky = candidate.risk_level == Some(RiskLevel::High) || candidate.requires_approval;
    if risky && candidate.evidence.is_empty() {
        violations.push(RuleViolation::new(
            "evidence",
            "high-risk or approval-gated actions must include evidence",
            "MISSING_RISK_EVIDENCE",
            RULE_RISK_EVIDENCE,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use nl_ledger::{Actor, Approval, Evidence, EvidenceKind};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 16, 13, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn seal(events: Vec<Event>) -> Vec<StoredEvent> {
        let mut stored: Vec<StoredEvent> = Vec::new();
        for (i, event) in events.into_iter().enumerate() {
            let prev = stored.last().map(|e| e.hash.clone());
            stored.push(StoredEvent::seal(i as u64 + 1, event, false, prev).unwrap());
        }
        stored
    }

    fn request(id: &str, decision_id: Option<&str>) -> Event {
        let mut approval = Approval::pending("agent");
        approval.decision_id = decision_id.map(str::to_string);
        Event::new(id, "run_1", at(0), EventType::ApprovalRequested, Actor::Agent, "Approval", "Needs review")
            .with_requires_approval(true)
            .with_approval(approval)
    }

    fn resolution(decision_id: Option<&str>) -> Event {
        let mut approval = Approval::resolved(ApprovalStatus::Approved, "human_reviewer", at(5));
        approval.decision_id = decision_id.map(str::to_string);
        Event::new("res", "run_1", at(5), EventType::ApprovalResolved, Actor::Human, "Approved", "ok")
            .with_requires_approval(true)
            .with_approval(approval)
    }

    fn codes(violations: &[RuleViolation]) -> Vec<&'static str> {
        violations.iter().map(|v| v.code).collect()
    }

    #[test]
    fn plain_event_on_empty_run_passes() {
        let event = Event::new("e", "run_1", at(0), EventType::Intent, Actor::Agent, "t", "d");
        assert!(BusinessRuleGate.validate(&event, &[]).is_ok());
    }

    #[test]
    fn terminal_history_locks_the_run() {
        let existing = seal(vec![Event::new(
            "done", "run_1", at(0), EventType::Summary, Actor::Agent, "Done", "Run complete.",
        )]);
        let next = Event::new("more", "run_1", at(1), EventType::Observation, Actor::Agent, "t", "d");
        let violations = BusinessRuleGate.validate(&next, &existing).unwrap_err();
        assert_eq!(codes(&violations), vec!["TERMINAL_STATE_CONFLICT"]);
        assert_eq!(violations[0].rule_id, RULE_TERMINAL_LOCK);
    }

    #[test]
    fn malformed_request_reports_both_problems() {
        let event = Event::new("req", "run_1", at(0), EventType::ApprovalRequested, Actor::Agent, "t", "d");
        let violations = BusinessRuleGate.validate(&event, &[]).unwrap_err();
        assert_eq!(
            codes(&violations),
            vec!["INVALID_APPROVAL_TRANSITION", "INVALID_APPROVAL_TRANSITION"]
        );
        assert!(violations.iter().all(|v| v.rule_id == RULE_APPROVAL_REQUEST_SHAPE));
    }

    #[test]
    fn resolution_without_pending_is_rejected() {
        let violations = BusinessRuleGate.validate(&resolution(None), &[]).unwrap_err();
        assert_eq!(codes(&violations), vec!["NO_PENDING_APPROVAL"]);
        assert_eq!(violations[0].rule_id, RULE_PENDING_REQUIRED);
    }

    #[test]
    fn resolution_collects_every_violation() {
        let existing = seal(vec![request("req", Some("dec_1"))]);
        let mut candidate = resolution(Some("dec_other"));
        candidate.approval.resolved_by = None;
        candidate.approval.resolved_at = None;
        let violations = BusinessRuleGate.validate(&candidate, &existing).unwrap_err();
        assert_eq!(
            codes(&violations),
            vec![
                "APPROVAL_DECISION_ID_MISMATCH",
                "MISSING_APPROVER_ID",
                "MISSING_APPROVAL_TIMESTAMP",
            ]
        );
        let rule_ids: Vec<&str> = violations.iter().map(|v| v.rule_id).collect();
        assert_eq!(
            rule_ids,
            vec![
                RULE_DECISION_ID_MATCH,
                RULE_APPROVER_REQUIRED,
                RULE_APPROVAL_TIMESTAMP_REQUIRED,
            ]
        );
    }

    #[test]
    fn matching_resolution_passes() {
        let existing = seal(vec![request("req", Some("dec_1"))]);
        assert!(BusinessRuleGate
            .validate(&resolution(Some("dec_1")), &existing)
            .is_ok());
    }

    #[test]
    fn decision_id_is_not_checked_when_request_has_none() {
        let existing = seal(vec![request("req", None)]);
        assert!(BusinessRuleGate
            .validate(&resolution(Some("anything")), &existing)
            .is_ok());
    }

    #[test]
    fn summary_while_pending_is_rejected() {
        let existing = seal(vec![request("req", None)]);
        let summary = Event::new("sum", "run_1", at(3), EventType::Summary, Actor::Agent, "Done", "Done.")
            .with_requires_approval(true);
        let violations = BusinessRuleGate.validate(&summary, &existing).unwrap_err();
        assert_eq!(
            codes(&violations),
            vec!["INVALID_SUMMARY_COMPLETION", "PENDING_APPROVAL_EXISTS"]
        );
    }

    #[test]
    fn risky_action_needs_evidence() {
        let bare = Event::new("act", "run_1", at(0), EventType::Action, Actor::Agent, "Refund", "Refund sent.")
            .with_risk_level(RiskLevel::High);
        let violations = BusinessRuleGate.validate(&bare, &[]).unwrap_err();
        assert_eq!(codes(&violations), vec!["MISSING_RISK_EVIDENCE"]);
        assert_eq!(violations[0].rule_id, RULE_RISK_EVIDENCE);

        let backed = bare.with_evidence(Evidence::new(EvidenceKind::Log, "log", "log://refund"));
        assert!(BusinessRuleGate.validate(&backed, &[]).is_ok());
    }

    #[test]
    fn broken_history_becomes_a_single_violation() {
        let existing = seal(vec![request("a", None), request("b", None)]);
        let violations = BusinessRuleGate
            .validate(&resolution(None), &existing)
            .unwrap_err();
        assert_eq!(codes(&violations), vec!["DUPLICATE_PENDING_APPROVAL"]);
        assert_eq!(violations[0].rule_id, RULE_APPROVAL_REQUEST_SHAPE);
    }

    #[test]
    fn second_request_while_paused_is_rejected() {
        let existing = seal(vec![request("first", Some("dec_1"))]);
        let violations = BusinessRuleGate
            .validate(&request("second", Some("dec_2")), &existing)
            .unwrap_err();
        assert_eq!(codes(&violations), vec!["DUPLICATE_PENDING_APPROVAL"]);
        assert_eq!(violations[0].rule_id, RULE_APPROVAL_REQUEST_SHAPE);
    }

    #[test]
    fn rejected_run_only_accepts_a_terminal_stop() {
        let mut rejected = resolution(None);
        rejected.approval.status = ApprovalStatus::Rejected;
        let existing = seal(vec![request("req", None), rejected]);

        let note = Event::new("note", "run_1", at(6), EventType::Observation, Actor::Agent, "t", "d");
        let violations = BusinessRuleGate.validate(&note, &existing).unwrap_err();
        assert_eq!(codes(&violations), vec!["REJECTED_STATE_CONFLICT"]);
        assert_eq!(violations[0].rule_id, RULE_PENDING_REQUIRED);

        let stop = Event::new("stop", "run_1", at(6), EventType::Error, Actor::System, "Stopped", "Run stopped.")
            .with_meta("ops", "run_stopped");
        assert!(BusinessRuleGate.validate(&stop, &existing).is_ok());
    }

    #[test]
    fn backdated_summary_cannot_close_a_run_behind_later_events() {
        let existing = seal(vec![Event::new(
            "a", "run_1", at(120), EventType::Observation, Actor::Agent, "t", "d",
        )]);
        let summary = Event::new("sum", "run_1", at(0), EventType::Summary, Actor::Agent, "Done", "Done.");
        let violations = BusinessRuleGate.validate(&summary, &existing).unwrap_err();
        assert_eq!(codes(&violations), vec!["TERMINAL_STATE_CONFLICT"]);
        assert_eq!(violations[0].rule_id, RULE_TERMINAL_LOCK);
    }

    #[test]
    fn backdated_resolution_before_its_request_is_rejected() {
        let mut late_request = request("req", None);
        late_request.timestamp = at(10);
        let existing = seal(vec![late_request]);
        let violations = BusinessRuleGate
            .validate(&resolution(None), &existing)
            .unwrap_err();
        assert_eq!(codes(&violations), vec!["NO_PENDING_APPROVAL"]);
    }
}
