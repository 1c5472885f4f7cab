// audit.rs — Decision audit export.
//
// Exports the ledger trail of one policy decision together with the hash
// chain fields, after verifying the chain of the run that holds it. A
// decision id that shows up in more than one run is refused: chains are per
// run and there is no sound order to merge them in.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use nl_ledger::event::timestamp;
use nl_ledger::{verify_run, Actor, EventStore, EventType};
use serde::Serialize;
use tracing::debug;

use crate::error::{GovernanceError, LookupKey};

/// One exported ledger event.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuditEntry {
    pub event_id: String,
    pub decision_id: String,
    pub action_type: EventType,
    pub actor: Actor,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub prev_hash: Option<String>,
    pub hash: String,
}

/// The verified trail of one decision.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DecisionAudit {
    pub decision_id: String,
    pub run_id: String,
    /// Head of the run's verified chain.
    pub chain_head: Option<String>,
    pub entries: Vec<AuditEntry>,
}

/// Export every event carrying `decision_id`, in ledger order.
pub fn export_decision_audit(
    store: &dyn EventStore,
    decision_id: &str,
) -> Result<DecisionAudit, GovernanceError> {
    let decision_id = decision_id.trim();
    let events: Vec<_> = store
        .list_all()?
        .into_iter()
        .filter(|stored| stored.event.decision_id() == Some(decision_id))
        .collect();

    let run_ids: BTreeSet<&str> = events.iter().map(|stored| stored.run_id()).collect();
    if run_ids.len() > 1 {
        return Err(GovernanceError::CrossRunDecision {
            decision_id: decision_id.to_string(),
            run_ids: run_ids.iter().map(|id| id.to_string()).collect(),
        });
    }
    let run_id = match run_ids.into_iter().next() {
        Some(id) => id.to_string(),
        None => {
            return Err(GovernanceError::ApprovalNotFound {
                id: decision_id.to_string(),
                key: LookupKey::DecisionId,
            })
        }
    };

    let report = verify_run(store, &run_id)?;
    debug!(decision_id, run_id = %run_id, events = report.event_count, "decision chain verified");

    let entries = events
        .into_iter()
        .map(|stored| AuditEntry {
            event_id: stored.event.id,
            decision_id: decision_id.to_string(),
            action_type: stored.event.event_type,
            actor: stored.event.actor,
            timestamp: stored.event.timestamp,
            reason: stored.event.details,
            prev_hash: stored.prev_hash,
            hash: stored.hash,
        })
        .collect();

    Ok(DecisionAudit {
        decision_id: decision_id.to_string(),
        run_id,
        chain_head: report.head_hash,
        entries,
    })
}
