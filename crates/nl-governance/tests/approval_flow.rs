//! End-to-end approval scenarios, run against both event stores.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, TimeZone, Utc};
use nl_governance::{
    export_decision_audit, ApprovalRequest, ApprovalWorkflow, Decision, DuplicateReason,
    GovernanceError, Ledger, Resolution, RunStatus, TriageInboxContinuation,
};
use nl_ledger::{
    verify_run, Actor, Approval, Event, EventStore, EventType, Evidence, EvidenceKind,
    InMemoryEventStore, RiskLevel, SqliteEventStore,
};

fn stores() -> Vec<(&'static str, Arc<dyn EventStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let memory: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let sqlite: Arc<dyn EventStore> =
        Arc::new(SqliteEventStore::open(dir.path().join("ledger.db")).unwrap());
    vec![("memory", memory, None), ("sqlite", sqlite, Some(dir))]
}

fn request(decision_id: &str, run_id: &str) -> ApprovalRequest {
    ApprovalRequest {
        decision_id: decision_id.to_string(),
        run_id: run_id.to_string(),
        requested_by: "agent".to_string(),
        title: "Refund approval".to_string(),
        details: "Refund of 250 EUR exceeds the auto-approve limit.".to_string(),
        risk_level: RiskLevel::High,
        reason: Some("Refund above limit".to_string()),
    }
}

fn approve(by: &str) -> Resolution {
    Resolution::new(Decision::Approved, by)
}

#[test]
fn pending_approved_running_scenario() {
    for (name, store, _dir) in stores() {
        let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));
        let ledger = workflow.ledger();

        let registered = workflow.register_pending_approval(&request("D1", "R1")).unwrap();
        let paused = ledger.run_status("R1").unwrap();
        assert_eq!(paused.status, RunStatus::Paused, "{name}");
        let pending = paused.pending_approval.unwrap();
        assert_eq!(pending.event_id, registered.event_id, "{name}");
        assert_eq!(pending.reason, "Refund above limit", "{name}");

        workflow
            .resolve_pending_approval_by_decision_id("D1", &approve("alice"))
            .unwrap();
        assert_eq!(ledger.run_status("R1").unwrap().status, RunStatus::Approved, "{name}");

        let action = Event::new(
            "evt_send_refund",
            "R1",
            Utc::now() + Duration::seconds(5),
            EventType::Action,
            Actor::Agent,
            "Send refund",
            "Refund issued to the customer.",
        );
        ledger.submit(action).unwrap();
        assert_eq!(ledger.run_status("R1").unwrap().status, RunStatus::Running, "{name}");

        verify_run(ledger.store(), "R1").unwrap();
    }
}

#[test]
fn resolving_twice_fails_by_either_identifier() {
    for (name, store, _dir) in stores() {
        let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));

        let by_event = workflow.register_pending_approval(&request("D1", "R1")).unwrap();
        workflow
            .resolve_pending_approval(&by_event.event_id, &approve("alice"))
            .unwrap();
        let err = workflow
            .resolve_pending_approval(&by_event.event_id, &approve("alice"))
            .unwrap_err();
        assert!(
            matches!(err, GovernanceError::DuplicateApproval { reason: DuplicateReason::Resolved, .. }),
            "{name}: {err}"
        );

        workflow.register_pending_approval(&request("D2", "R2")).unwrap();
        workflow
            .resolve_pending_approval_by_decision_id("D2", &approve("bob"))
            .unwrap();
        let err = workflow
            .resolve_pending_approval_by_decision_id("D2", &approve("bob"))
            .unwrap_err();
        assert!(
            matches!(err, GovernanceError::DuplicateApproval { .. }),
            "{name}: {err}"
        );

        // Exactly one resolution per request.
        let resolutions = workflow
            .ledger()
            .store()
            .list_all()
            .unwrap()
            .into_iter()
            .filter(|e| e.event.event_type == EventType::ApprovalResolved)
            .count();
        assert_eq!(resolutions, 2, "{name}");
    }
}

#[test]
fn concurrent_resolvers_resolve_exactly_once() {
    const RESOLVERS: usize = 8;

    for (name, store, _dir) in stores() {
        let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));
        workflow.register_pending_approval(&request("D1", "R1")).unwrap();

        let barrier = Barrier::new(RESOLVERS);
        let results: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..RESOLVERS)
                .map(|i| {
                    let workflow = &workflow;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        workflow.resolve_pending_approval_by_decision_id(
                            "D1",
                            &approve(&format!("reviewer_{i}")),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "{name}");
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(err, GovernanceError::DuplicateApproval { reason: DuplicateReason::Resolved, .. }),
                "{name}: {err}"
            );
        }

        let resolutions = workflow
            .ledger()
            .store()
            .list_by_run_id("R1")
            .unwrap()
            .into_iter()
            .filter(|e| e.event.event_type == EventType::ApprovalResolved)
            .count();
        assert_eq!(resolutions, 1, "{name}");
        assert_eq!(workflow.ledger().run_status("R1").unwrap().status, RunStatus::Approved, "{name}");
        verify_run(workflow.ledger().store(), "R1").unwrap();
    }
}

#[test]
fn second_registration_on_paused_run_keeps_run_readable() {
    for (name, store, _dir) in stores() {
        let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));
        let first = workflow.register_pending_approval(&request("D1", "R1")).unwrap();

        let err = workflow
            .register_pending_approval(&request("D2", "R1"))
            .unwrap_err();
        assert_eq!(err.code(), "BUSINESS_RULE_VIOLATION", "{name}");

        let pending = workflow.list_pending_approvals().unwrap();
        assert_eq!(pending.len(), 1, "{name}");
        assert_eq!(pending[0].event_id, first.event_id, "{name}");
        let outcome = workflow
            .resolve_pending_approval_by_decision_id("D1", &approve("alice"))
            .unwrap();
        assert_eq!(outcome.state_transition, "paused->approved", "{name}");
    }
}

#[test]
fn summary_locks_run_against_further_events() {
    for (name, store, _dir) in stores() {
        let ledger = Ledger::new(store);
        let at = Utc.with_ymd_and_hms(2026, 2, 16, 13, 0, 0).unwrap();
        ledger
            .submit(Event::new("done", "R2", at, EventType::Summary, Actor::Agent, "Done", "Run complete."))
            .unwrap();
        let err = ledger
            .submit(Event::new(
                "late",
                "R2",
                at + Duration::minutes(1),
                EventType::Observation,
                Actor::System,
                "Late",
                "Arrived after completion.",
            ))
            .unwrap_err();
        match err {
            GovernanceError::BusinessRule(violations) => {
                assert_eq!(violations[0].code, "TERMINAL_STATE_CONFLICT", "{name}");
                assert_eq!(violations[0].rule_id, "RULE-GATE-005", "{name}");
            }
            other => panic!("{name}: unexpected error {other}"),
        }
    }
}

#[test]
fn reused_event_id_across_runs_is_ambiguous() {
    for (name, store, _dir) in stores() {
        let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));
        let ledger = workflow.ledger();
        let at = Utc.with_ymd_and_hms(2026, 2, 16, 13, 0, 0).unwrap();

        ledger
            .submit(
                Event::new("E1", "R1", at, EventType::ApprovalRequested, Actor::Agent, "Approve", "Needs review.")
                    .with_requires_approval(true)
                    .with_approval(Approval::pending("agent")),
            )
            .unwrap();
        ledger
            .submit(Event::new("E1", "R2", at, EventType::Intent, Actor::Agent, "Plan", "Plan the run."))
            .unwrap();

        let err = workflow
            .resolve_pending_approval("E1", &approve("alice"))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::AmbiguousEventId(ref id) if id == "E1"), "{name}");
        assert_eq!(ledger.run_status("R1").unwrap().status, RunStatus::Paused, "{name}");
    }
}

#[test]
fn triage_continuation_completes_the_run() {
    for (name, store, _dir) in stores() {
        let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));
        let ledger = workflow.ledger();
        let at = Utc::now();

        ledger
            .submit(
                Event::new("evt_triage_refund", "run_triage", at, EventType::ApprovalRequested, Actor::Agent, "Refund needs approval", "Refund of 250 EUR.")
                    .with_requires_approval(true)
                    .with_risk_level(RiskLevel::High)
                    .with_approval(Approval::pending("agent").with_decision_id("dec_triage"))
                    .with_evidence(Evidence::new(EvidenceKind::Log, "Ticket", "ticket://4711"))
                    .with_meta(TriageInboxContinuation::WORKFLOW, "approval_requested"),
            )
            .unwrap();

        let outcome = workflow
            .resolve_pending_approval("evt_triage_refund", &approve("alice"))
            .unwrap();
        assert_eq!(
            outcome.continuation_event_ids,
            vec!["evt_triage_refund_resume", "evt_triage_refund_complete"],
            "{name}"
        );
        assert_eq!(outcome.run_status, RunStatus::Completed, "{name}");
        assert_eq!(outcome.state_transition, "paused->completed", "{name}");

        let audit = export_decision_audit(ledger.store(), "dec_triage").unwrap();
        assert_eq!(audit.entries.len(), 2, "{name}");
        assert_eq!(audit.entries[1].event_id, outcome.event_id, "{name}");
    }
}

#[test]
fn approvals_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");

    let registered = {
        let store = Arc::new(SqliteEventStore::open(&path).unwrap());
        let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));
        workflow.register_pending_approval(&request("D1", "R1")).unwrap()
    };

    let store = Arc::new(SqliteEventStore::open(&path).unwrap());
    let workflow = ApprovalWorkflow::new(Arc::new(Ledger::new(store)));
    let pending = workflow.list_pending_approvals().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_id, registered.event_id);
    assert_eq!(pending[0].decision_id.as_deref(), Some("D1"));

    let outcome = workflow
        .resolve_pending_approval_by_decision_id("D1", &Resolution::new(Decision::Rejected, "carol"))
        .unwrap();
    assert_eq!(outcome.run_status, RunStatus::Stopped);
    assert!(workflow.list_pending_approvals().unwrap().is_empty());

    let state = workflow.approval_decision_state("D1").unwrap();
    assert_eq!(state.resolved_by.as_deref(), Some("carol"));
    assert!(verify_run(workflow.ledger().store(), "R1").is_ok());
}
