// ledger.rs — The gated write path into an EventStore.
//
// Every write goes through `LedgerWriter::submit`: normalize, validate the
// schema, run the business-rule gate against the run's history, then append.
// A single write mutex spans gate and append so the history the gate checked
// is still the history the event lands on.

use std::sync::{Arc, Mutex, MutexGuard};

use nl_ledger::{parse_event, Event, EventStore, LedgerError, StoredEvent};
use tracing::debug;

use crate::error::GovernanceError;
use crate::projector::{project_run_status, RunStatusProjection};
use crate::rules::BusinessRuleGate;

/// An event store plus the rules that guard writes into it.
pub struct Ledger {
    store: Arc<dyn EventStore>,
    gate: BusinessRuleGate,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            gate: BusinessRuleGate,
            write_lock: Mutex::new(()),
        }
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &dyn EventStore {
        self.store.as_ref()
    }

    /// Take the write lock. Hold the returned writer across any lookup whose
    /// result decides what gets appended.
    pub fn writer(&self) -> Result<LedgerWriter<'_>, GovernanceError> {
        let guard = self
            .write_lock
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)?;
        Ok(LedgerWriter {
            store: self.store.as_ref(),
            gate: &self.gate,
            _guard: guard,
        })
    }

    /// Submit one event through the gate.
    pub fn submit(&self, event: Event) -> Result<StoredEvent, GovernanceError> {
        self.writer()?.submit(event)
    }

    /// Parse untrusted JSON into an event and submit it.
    pub fn submit_json(&self, value: serde_json::Value) -> Result<StoredEvent, GovernanceError> {
        let event = parse_event(value)?;
        self.submit(event)
    }

    /// Current status of a run. Fails with `RunNotFound` if the run has no events.
    pub fn run_status(&self, run_id: &str) -> Result<RunStatusProjection, GovernanceError> {
        let events = self.store.list_by_run_id(run_id)?;
        if events.is_empty() {
            return Err(GovernanceError::RunNotFound(run_id.to_string()));
        }
        Ok(project_run_status(&events)?)
    }
}

/// Exclusive write access to a [`Ledger`], released on drop.
pub struct LedgerWriter<'a> {
    store: &'a dyn EventStore,
    gate: &'a BusinessRuleGate,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> LedgerWriter<'a> {
    pub fn store(&self) -> &'a dyn EventStore {
        self.store
    }

    pub fn submit(&self, event: Event) -> Result<StoredEvent, GovernanceError> {
        let event = event.normalize();
        event.validate()?;

        let existing = self.store.list_by_run_id(&event.run_id)?;
        self.gate
            .validate(&event, &existing)
            .map_err(GovernanceError::BusinessRule)?;

        let stored = self.store.append(event)?;
        debug!(
            run_id = %stored.event.run_id,
            event_id = %stored.event.id,
            event_type = %stored.event.event_type,
            "event accepted by gate"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::RunStatus;
    use chrono::{Duration, TimeZone, Utc};
    use nl_ledger::{Actor, Approval, ApprovalStatus, EventType, InMemoryEventStore};
    use serde_json::json;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(InMemoryEventStore::new()))
    }

    fn event(id: &str, run_id: &str, event_type: EventType) -> Event {
        Event::new(
            id,
            run_id,
            Utc.with_ymd_and_hms(2026, 2, 16, 13, 0, 0).unwrap(),
            event_type,
            Actor::Agent,
            "Step",
            "Agent step.",
        )
    }

    #[test]
    fn summary_locks_the_run() {
        let ledger = ledger();
        ledger.submit(event("e1", "R2", EventType::Intent)).unwrap();
        ledger.submit(event("e2", "R2", EventType::Summary)).unwrap();

        let err = ledger
            .submit(event("e3", "R2", EventType::Action))
            .unwrap_err();
        match err {
            GovernanceError::BusinessRule(violations) => {
                assert_eq!(violations[0].code, "TERMINAL_STATE_CONFLICT");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ledger.store().list_by_run_id("R2").unwrap().len(), 2);
        assert_eq!(ledger.run_status("R2").unwrap().status, RunStatus::Completed);
    }

    #[test]
    fn schema_errors_are_reported_before_the_gate() {
        let ledger = ledger();
        let mut bad = event("e1", "R1", EventType::Action);
        bad.details = "  ".to_string();
        let err = ledger.submit(bad).unwrap_err();
        assert_eq!(err.code(), "SCHEMA_VALIDATION_ERROR");
    }

    #[test]
    fn duplicate_ids_pass_through_as_ledger_errors() {
        let ledger = ledger();
        ledger.submit(event("e1", "R1", EventType::Intent)).unwrap();
        let err = ledger.submit(event("e1", "R1", EventType::Intent)).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_EVENT_ID");
    }

    #[test]
    fn json_submission_parses_and_gates() {
        let ledger = ledger();
        let stored = ledger
            .submit_json(json!({
                "id": "evt_1",
                "run_id": "R1",
                "timestamp": "2026-02-16T13:00:00Z",
                "type": "observation",
                "actor": "system",
                "title": "Inbox scanned",
                "details": "Found 3 new tickets.",
                "approval": {"status": "not_required"}
            }))
            .unwrap();
        assert_eq!(stored.sequence, 1);
    }

    fn rule_codes(err: GovernanceError) -> Vec<&'static str> {
        match err {
            GovernanceError::BusinessRule(violations) => violations.iter().map(|v| v.code).collect(),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn backdated_summary_is_refused_and_run_stays_readable() {
        let ledger = ledger();
        let mut later = event("a", "R1", EventType::Observation);
        later.timestamp += Duration::hours(2);
        ledger.submit(later).unwrap();

        let err = ledger.submit(event("sum", "R1", EventType::Summary)).unwrap_err();
        assert_eq!(rule_codes(err), vec!["TERMINAL_STATE_CONFLICT"]);

        let mut after = event("after", "R1", EventType::Observation);
        after.timestamp += Duration::hours(3);
        ledger.submit(after).unwrap();
        assert_eq!(ledger.run_status("R1").unwrap().status, RunStatus::Running);
    }

    #[test]
    fn rejected_run_refuses_anything_but_a_stop() {
        let ledger = ledger();
        let start = Utc.with_ymd_and_hms(2026, 2, 16, 13, 0, 0).unwrap();
        ledger
            .submit(
                event("req", "R1", EventType::ApprovalRequested)
                    .with_requires_approval(true)
                    .with_approval(Approval::pending("agent")),
            )
            .unwrap();
        let mut rejected = event("res", "R1", EventType::ApprovalResolved)
            .with_requires_approval(true)
            .with_approval(Approval::resolved(ApprovalStatus::Rejected, "bob", start));
        rejected.timestamp += Duration::minutes(1);
        ledger.submit(rejected).unwrap();

        let mut note = event("note", "R1", EventType::Observation);
        note.timestamp += Duration::minutes(2);
        let err = ledger.submit(note).unwrap_err();
        assert_eq!(rule_codes(err), vec!["REJECTED_STATE_CONFLICT"]);
        assert_eq!(ledger.run_status("R1").unwrap().status, RunStatus::Rejected);

        let mut stop = event("stop", "R1", EventType::Error).with_meta("ops", "run_stopped");
        stop.timestamp += Duration::minutes(2);
        ledger.submit(stop).unwrap();
        assert_eq!(ledger.run_status("R1").unwrap().status, RunStatus::Stopped);
    }

    #[test]
    fn unknown_run_has_no_status() {
        let err = ledger().run_status("missing").unwrap_err();
        assert!(matches!(err, GovernanceError::RunNotFound(_)));
    }
}
