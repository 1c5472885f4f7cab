// hasher.rs — SHA-256 hashing and the canonical event digest.
//
// All hashes in NightLedger are SHA-256, hex-encoded. `event_hash` is the
// single hash-construction function for the per-run chain; audit tooling
// calls it directly to re-verify stored history, so its input encoding must
// never change.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::event::timestamp as wire_time;

/// Hash arbitrary bytes, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Hash a UTF-8 string, returning a lowercase hex-encoded SHA-256 string.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Compute the chain digest of one stored event.
///
/// The digest covers `{event_id, integrity_warning, payload, prev_hash,
/// run_id, timestamp}` encoded as canonical JSON: object keys sorted at every
/// depth, no insignificant whitespace, timestamp in the ledger wire format.
pub fn event_hash(
    run_id: &str,
    event_id: &str,
    timestamp: &DateTime<Utc>,
    payload: &Value,
    integrity_warning: bool,
    prev_hash: Option<&str>,
) -> String {
    let envelope = json!({
        "run_id": run_id,
        "event_id": event_id,
        "timestamp": wire_time::format(timestamp),
        "payload": payload,
        "integrity_warning": integrity_warning,
        "prev_hash": prev_hash,
    });
    hash_str(&canonical_json(&envelope))
}

/// Encode a JSON value with object keys sorted recursively.
///
/// Independent of serde_json's map ordering features, so the encoding stays
/// stable regardless of how the dependency graph configures serde_json.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
