// chain.rs — Hash-chain verification.
//
// Each run's events form a chain in append order: event n carries the hash
// of event n-1 as `prev_hash`, and its own `hash` covers that link. Any
// insertion, deletion, or edit of a stored event breaks the chain at or
// after the altered record, which `verify_chain` reports.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::LedgerError;
use crate::store::{EventStore, StoredEvent};

/// Summary of a verified run chain.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChainReport {
    pub run_id: String,
    pub event_count: usize,
    /// Hash of the last event in append order (None for an empty run).
    pub head_hash: Option<String>,
}

/// Verify a run's events, given in append (sequence) order.
///
/// Checks that each record links to its predecessor and that its stored
/// hash recomputes from its recorded fields.
pub fn verify_chain(events: &[StoredEvent]) -> Result<(), LedgerError> {
    let mut previous_hash: Option<&str> = None;
    let mut previous_sequence: Option<u64> = None;

    for stored in events {
        let broken = |reason: String| LedgerError::ChainBroken {
            run_id: stored.event.run_id.clone(),
            event_id: stored.event.id.clone(),
            sequence: stored.sequence,
            reason,
        };

        if previous_sequence.is_some_and(|prev| stored.sequence <= prev) {
            return Err(broken("events are not in append order".to_string()));
        }
        if stored.prev_hash.as_deref() != previous_hash {
            return Err(broken(format!(
                "prev_hash {} does not match previous event hash {}",
                stored.prev_hash.as_deref().unwrap_or("none"),
                previous_hash.unwrap_or("none"),
            )));
        }
        let expected = stored.recompute_hash(previous_hash)?;
        if stored.hash != expected {
            return Err(broken(format!(
                "stored hash {} does not recompute (expected {})",
                stored.hash, expected
            )));
        }

        previous_hash = Some(stored.hash.as_str());
        previous_sequence = Some(stored.sequence);
    }

    Ok(())
}

/// Verify one run's chain straight from a store.
pub fn verify_run(store: &dyn EventStore, run_id: &str) -> Result<ChainReport, LedgerError> {
    let events = store.list_chain(run_id)?;
    verify_chain(&events)?;
    Ok(ChainReport {
        run_id: run_id.to_string(),
        event_count: events.len(),
        head_hash: events.last().map(|e| e.hash.clone()),
    })
}

/// Verify every run in a store, in run-id order. Stops at the first break.
pub fn verify_store(store: &dyn EventStore) -> Result<Vec<ChainReport>, LedgerError> {
    let run_ids: BTreeSet<String> = store
        .list_all()?
        .into_iter()
        .map(|e| e.event.run_id)
        .collect();
    run_ids
        .iter()
        .map(|run_id| verify_run(store, run_id))
        .collect()
}
