//! # nl-ledger
//!
//! Append-only, hash-chained event ledger for NightLedger.
//!
//! Every intent, action, observation, decision, and approval an agent run
//! produces is recorded as an [`Event`]. An [`EventStore`] accepts each event
//! exactly once, assigns it a store-wide sequence number, flags timestamps
//! that regress within a run, and links it into a per-run SHA-256 hash chain
//! so that any later edit of history is detectable.
//!
//! Two stores implement the same contract:
//!
//! - [`InMemoryEventStore`] — process-lifetime, lock-protected maps
//! - [`SqliteEventStore`] — durable, duplicate detection by unique constraint
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use nl_ledger::{Actor, Event, EventStore, EventType, InMemoryEventStore};
//!
//! let store = InMemoryEventStore::new();
//! let event = Event::new(
//!     "evt_1", "run_1", Utc::now(), EventType::Intent, Actor::Agent,
//!     "Triage inbox", "Agent plans to triage the support inbox.",
//! );
//! let stored = store.append(event).unwrap();
//! assert!(stored.prev_hash.is_none());
//! ```

pub mod chain;
pub mod error;
pub mod event;
pub mod hasher;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use chain::{verify_chain, verify_run, verify_store, ChainReport};
pub use error::{ErrorKind, LedgerError, ValidationDetail};
pub use event::{
    parse_event, Actor, Approval, ApprovalStatus, Event, EventMeta, EventType, Evidence,
    EvidenceKind, RiskLevel,
};
pub use hasher::event_hash;
pub use memory::InMemoryEventStore;
pub use sqlite::SqliteEventStore;
pub use store::{sort_ledger_order, EventStore, StoredEvent};
