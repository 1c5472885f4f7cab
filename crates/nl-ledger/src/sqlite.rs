// sqlite.rs — Durable event store backed by SQLite.
//
// Same contract as the in-memory store, persisted in a single `events`
// table. The `UNIQUE(run_id, event_id)` constraint is the authority on
// duplicates: a violation on insert is reported as `DuplicateEvent`, so
// there is no window between a check and the write.
//
// Timestamps are stored in the fixed-width ledger wire format, which sorts
// lexicographically in time order, so `ORDER BY timestamp, sequence` is the
// ledger read order.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::event::{timestamp, Event};
use crate::hasher;
use crate::store::{EventStore, RunHead, StoredEvent};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    integrity_warning INTEGER NOT NULL,
    prev_hash TEXT,
    hash TEXT NOT NULL,
    UNIQUE(run_id, event_id)
);
CREATE INDEX IF NOT EXISTS idx_events_run_timestamp_sequence
    ON events(run_id, timestamp, sequence);
";

const SELECT_COLUMNS: &str = "SELECT sequence, payload_json, integrity_warning, prev_hash, hash FROM events";

/// SQLite-backed event store. Survives process restarts.
pub struct SqliteEventStore {
    state: Mutex<State>,
}

struct State {
    conn: Connection,
    /// Per-run trackers, loaded lazily from the table on a run's first append.
    heads: HashMap<String, RunHead>,
}

/// A row as read from the table, before the payload is decoded.
struct RawRow {
    sequence: i64,
    payload_json: String,
    integrity_warning: bool,
    prev_hash: Option<String>,
    hash: String,
}

impl SqliteEventStore {
    /// Open (or create) a ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| LedgerError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL keeps readers off the writer's back; NORMAL syncs at checkpoints.
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn)
    }

    /// A private, non-persistent database. Useful for tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            state: Mutex::new(State {
                conn,
                heads: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    fn query(&self, sql: &str, run_id: Option<&str>) -> Result<Vec<StoredEvent>, LedgerError> {
        let state = self.lock()?;
        let mut stmt = state.conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(RawRow {
                sequence: row.get(0)?,
                payload_json: row.get(1)?,
                integrity_warning: row.get(2)?,
                prev_hash: row.get(3)?,
                hash: row.get(4)?,
            })
        };
        let rows = match run_id {
            Some(run_id) => stmt
                .query_map(params![run_id], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        drop(stmt);
        drop(state);

        rows.into_iter().map(decode_row).collect()
    }
}

/// Load a run's trackers from the table.
fn load_head(conn: &Connection, run_id: &str) -> Result<RunHead, LedgerError> {
    let last_timestamp: Option<String> = conn.query_row(
        "SELECT MAX(timestamp) FROM events WHERE run_id = ?1",
        params![run_id],
        |row| row.get(0),
    )?;
    let last_hash: Option<String> = conn
        .query_row(
            "SELECT hash FROM events WHERE run_id = ?1 ORDER BY sequence DESC LIMIT 1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;

    let last_timestamp = match last_timestamp {
        Some(raw) => Some(timestamp::parse(&raw).map_err(|reason| LedgerError::CorruptRecord {
            sequence: 0,
            reason,
        })?),
        None => None,
    };
    Ok(RunHead {
        last_timestamp,
        last_hash,
    })
}

fn decode_row(row: RawRow) -> Result<StoredEvent, LedgerError> {
    let sequence = u64::try_from(row.sequence).map_err(|_| LedgerError::CorruptRecord {
        sequence: 0,
        reason: format!("negative sequence {}", row.sequence),
    })?;
    let event: Event =
        serde_json::from_str(&row.payload_json).map_err(|err| LedgerError::CorruptRecord {
            sequence,
            reason: err.to_string(),
        })?;
    Ok(StoredEvent {
        sequence,
        event,
        integrity_warning: row.integrity_warning,
        prev_hash: row.prev_hash,
        hash: row.hash,
    })
}

impl EventStore for SqliteEventStore {
    fn append(&self, event: Event) -> Result<StoredEvent, LedgerError> {
        let event = event.normalize();
        let mut state = self.lock()?;
        let state = &mut *state;

        if !state.heads.contains_key(&event.run_id) {
            let head = load_head(&state.conn, &event.run_id)?;
            state.heads.insert(event.run_id.clone(), head);
        }
        let head = state.heads.get(&event.run_id).cloned().unwrap_or_default();

        let integrity_warning = head.regresses(&event.timestamp);
        let prev_hash = head.last_hash.clone();
        let payload = event.payload()?;
        let hash = hasher::event_hash(
            &event.run_id,
            &event.id,
            &event.timestamp,
            &payload,
            integrity_warning,
            prev_hash.as_deref(),
        );

        let inserted = state.conn.execute(
            "INSERT INTO events (run_id, event_id, timestamp, payload_json, integrity_warning, prev_hash, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.run_id,
                event.id,
                timestamp::format(&event.timestamp),
                hasher::canonical_json(&payload),
                integrity_warning,
                prev_hash,
                hash,
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(LedgerError::DuplicateEvent {
                    event_id: event.id,
                    run_id: event.run_id,
                });
            }
            Err(err) => return Err(err.into()),
        }

        let sequence = u64::try_from(state.conn.last_insert_rowid()).map_err(|_| {
            LedgerError::CorruptRecord {
                sequence: 0,
                reason: "sqlite returned a negative rowid".to_string(),
            }
        })?;
        let stored = StoredEvent {
            sequence,
            event,
            integrity_warning,
            prev_hash,
            hash,
        };
        if let Some(head) = state.heads.get_mut(&stored.event.run_id) {
            head.advance(&stored);
        }

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
            "event persisted"
        );
        Ok(stored)
    }

    fn list_by_run_id(&self, run_id: &str) -> Result<Vec<StoredEvent>, LedgerError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE run_id = ?1 ORDER BY timestamp ASC, sequence ASC"),
            Some(run_id),
        )
    }

    fn list_all(&self) -> Result<Vec<StoredEvent>, LedgerError> {
        self.query(
            &format!("{SELECT_COLUMNS} ORDER BY timestamp ASC, sequence ASC"),
            None,
        )
    }

    fn list_chain(&self, run_id: &str) -> Result<Vec<StoredEvent>, LedgerError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE run_id = ?1 ORDER BY sequence ASC"),
            Some(run_id),
        )
    }
}
