// memory.rs — In-memory append-only event store.
//
// All shared state sits behind one RwLock: appends take the write lock,
// reads take the read lock and clone out a snapshot. Per-run indexes make
// duplicate and out-of-order checks O(1) regardless of history size.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::event::Event;
use crate::store::{sort_ledger_order, EventStore, RunHead, StoredEvent};

/// Process-lifetime event store.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// Last sequence handed out. Starts at 0, so the first event gets 1.
    sequence: u64,
    runs: HashMap<String, RunLog>,
}

#[derive(Default)]
struct RunLog {
    ids: HashSet<String>,
    /// Records in append order.
    records: Vec<StoredEvent>,
    head: RunHead,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, LedgerError> {
        self.inner.read().map_err(|_| LedgerError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, LedgerError> {
        self.inner.write().map_err(|_| LedgerError::LockPoisoned)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, event: Event) -> Result<StoredEvent, LedgerError> {
        let event = event.normalize();
        let mut inner = self.write()?;
        let next_sequence = inner.sequence + 1;
        let run = inner.runs.entry(event.run_id.clone()).or_default();

        if run.ids.contains(&event.id) {
            return Err(LedgerError::DuplicateEvent {
                event_id: event.id,
                run_id: event.run_id,
            });
        }

        let integrity_warning = run.head.regresses(&event.timestamp);
        let prev_hash = run.head.last_hash.clone();
        let stored = StoredEvent::seal(next_sequence, event, integrity_warning, prev_hash)?;

        run.ids.insert(stored.event.id.clone());
        run.head.advance(&stored);
        run.records.push(stored.clone());
        inner.sequence = next_sequence;

        if integrity_warning {
            warn!(
                run_id = %stored.event.run_id,
                event_id = %stored.event.id,
                "event timestamp regresses within run; flagged with integrity warning"
            );
        }
        debug!(
            run_id = %stored.event.run_id,
            event_id = %stored.event.id,
            sequence = stored.sequence,
            "event appended"
        );
        Ok(stored)
    }

    fn list_by_run_id(&self, run_id: &str) -> Result<Vec<StoredEvent>, LedgerError> {
        let inner = self.read()?;
        let mut events = inner
            .runs
            .get(run_id)
            .map(|run| run.records.clone())
            .unwrap_or_default();
        drop(inner);
        sort_ledger_order(&mut events);
        Ok(events)
    }

    fn list_all(&self) -> Result<Vec<StoredEvent>, LedgerError> {
        let inner = self.read()?;
        let mut events: Vec<StoredEvent> = inner
            .runs
            .values()
            .flat_map(|run| run.records.iter().cloned())
            .collect();
        drop(inner);
        sort_ledger_order(&mut events);
        Ok(events)
    }

    fn list_chain(&self, run_id: &str) -> Result<Vec<StoredEvent>, LedgerError> {
        let inner = self.read()?;
        Ok(inner
            .runs
            .get(run_id)
            .map(|run| run.records.clone())
            .unwrap_or_default())
    }
}
