// store.rs — The EventStore contract and the stored-event record.
//
// An EventStore is an append-only keyed log of events, scoped by run.
// Implementations must:
// - reject a second event with the same (run_id, id) as DuplicateEvent
// - assign a strictly increasing, never reused sequence number per store
// - flag (never reorder) events whose timestamp regresses within a run
// - chain each event's hash to the previous event of the same run
// - return reads ordered by (timestamp, sequence)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::event::Event;
use crate::hasher;

/// An event as recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEvent {
    /// Store-wide append position. Never reused.
    pub sequence: u64,

    /// The accepted event, exactly as it was hashed.
    #[serde(rename = "payload")]
    pub event: Event,

    /// True iff this event's timestamp is earlier than the latest timestamp
    /// previously accepted for the same run.
    pub integrity_warning: bool,

    /// Hash of the previous event appended to the same run (None for the first).
    pub prev_hash: Option<String>,

    /// Chain digest of this record, see [`hasher::event_hash`].
    pub hash: String,
}

impl StoredEvent {
    /// Build a stored record and compute its chain hash.
    pub fn seal(
        sequence: u64,
        event: Event,
        integrity_warning: bool,
        prev_hash: Option<String>,
    ) -> Result<Self, LedgerError> {
        let payload = event.payload()?;
        let hash = hasher::event_hash(
            &event.run_id,
            &event.id,
            &event.timestamp,
            &payload,
            integrity_warning,
            prev_hash.as_deref(),
        );
        Ok(Self {
            sequence,
            event,
            integrity_warning,
            prev_hash,
            hash,
        })
    }

    /// Recompute this record's hash from its recorded fields, chained onto
    /// `prev_hash`.
    pub fn recompute_hash(&self, prev_hash: Option<&str>) -> Result<String, LedgerError> {
        let payload = self.event.payload()?;
        Ok(hasher::event_hash(
            &self.event.run_id,
            &self.event.id,
            &self.event.timestamp,
            &payload,
            self.integrity_warning,
            prev_hash,
        ))
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }

    pub fn run_id(&self) -> &str {
        &self.event.run_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.event.timestamp
    }
}

/// Append-only event storage, shared across threads.
///
/// Reads never fail for an unknown run; they return an empty list.
pub trait EventStore: Send + Sync {
    /// Accept one event. Fails with `DuplicateEvent` if `(run_id, id)` exists.
    fn append(&self, event: Event) -> Result<StoredEvent, LedgerError>;

    /// Events of one run, ordered by `(timestamp, sequence)`.
    fn list_by_run_id(&self, run_id: &str) -> Result<Vec<StoredEvent>, LedgerError>;

    /// Events of all runs, ordered by `(timestamp, sequence)`.
    fn list_all(&self) -> Result<Vec<StoredEvent>, LedgerError>;

    /// Events of one run in append (sequence) order, which is the hash chain order.
    fn list_chain(&self, run_id: &str) -> Result<Vec<StoredEvent>, LedgerError>;
}

/// Sort records into ledger read order: timestamp first, sequence breaks ties.
pub fn sort_ledger_order(events: &mut [StoredEvent]) {
    events.sort_by(|a, b| {
        a.event
            .timestamp
            .cmp(&b.event.timestamp)
            .then(a.sequence.cmp(&b.sequence))
    });
}

/// Per-run trackers kept by every store so each append is O(1) in history size.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunHead {
    /// Latest timestamp accepted so far for the run (a running maximum).
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Hash of the most recently appended event of the run.
    pub last_hash: Option<String>,
}

impl RunHead {
    /// Does `timestamp` regress relative to what this run has already seen?
    pub fn regresses(&self, timestamp: &DateTime<Utc>) -> bool {
        self.last_timestamp
            .as_ref()
            .is_some_and(|last| timestamp < last)
    }

    /// Advance the trackers after `stored` was appended.
    pub fn advance(&mut self, stored: &StoredEvent) {
        let timestamp = stored.event.timestamp;
        if self.last_timestamp.map_or(true, |last| timestamp > last) {
            self.last_timestamp = Some(timestamp);
        }
        self.last_hash = Some(stored.hash.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Actor, EventType};
    use chrono::TimeZone;

    fn event(id: &str, hour: u32) -> Event {
        Event::new(
            id,
            "run_1",
            Utc.with_ymd_and_hms(2026, 2, 16, hour, 0, 0).unwrap(),
            EventType::Action,
            Actor::Agent,
            "title",
            "details",
        )
    }

    #[test]
    fn sealed_hash_recomputes() {
        let stored = StoredEvent::seal(1, event("e1", 13), false, None).unwrap();
        assert_eq!(stored.recompute_hash(None).unwrap(), stored.hash);
        assert_ne!(stored.recompute_hash(Some("other")).unwrap(), stored.hash);
    }

    #[test]
    fn ledger_order_uses_sequence_as_tie_breaker() {
        let mut events = vec![
            StoredEvent::seal(3, event("c", 13), false, None).unwrap(),
            StoredEvent::seal(1, event("a", 15), false, None).unwrap(),
            StoredEvent::seal(2, event("b", 13), false, None).unwrap(),
        ];
        sort_ledger_order(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn run_head_tracks_running_maximum() {
        let mut head = RunHead::default();
        let late = StoredEvent::seal(1, event("a", 15), false, None).unwrap();
        head.advance(&late);
        let early = StoredEvent::seal(2, event("b", 13), true, Some(late.hash.clone())).unwrap();
        assert!(head.regresses(&early.event.timestamp));
        head.advance(&early);
        assert_eq!(head.last_timestamp, Some(late.event.timestamp));
        assert_eq!(head.last_hash.as_deref(), Some(early.hash.as_str()));
    }

    #[test]
    fn stored_event_serializes_event_as_payload() {
        let stored = StoredEvent::seal(1, event("e1", 13), false, None).unwrap();
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["payload"]["id"], "e1");
        assert_eq!(json["sequence"], 1);
        assert!(json["prev_hash"].is_null());
    }
}
