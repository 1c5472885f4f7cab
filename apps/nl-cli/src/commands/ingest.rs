// ingest.rs — Submit events from a JSON file through the rule gate.

use std::path::Path;

use anyhow::Context;
use nl_governance::Ledger;
use serde_json::Value;
use tracing::{info, warn};

use crate::commands::{describe, open_ledger};
use crate::config::LedgerConfig;

pub fn execute(config: &LedgerConfig, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;

    let ledger = open_ledger(config)?;
    let (accepted, rejected) = ingest(&ledger, value);
    info!(file = %file.display(), accepted, rejected, "ingest finished");

    println!("{} accepted, {} rejected.", accepted, rejected);
    if rejected > 0 {
        anyhow::bail!("{} event(s) were rejected", rejected);
    }
    Ok(())
}

/// Submit a single event or each element of an array, in order.
///
/// Rejections are reported and do not stop later events. Returns
/// `(accepted, rejected)`.
fn ingest(ledger: &Ledger, value: Value) -> (usize, usize) {
    let events = match value {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut accepted = 0;
    let mut rejected = 0;
    for (index, raw) in events.into_iter().enumerate() {
        match ledger.submit_json(raw) {
            Ok(stored) => {
                accepted += 1;
                let flag = if stored.integrity_warning {
                    "  [integrity warning: timestamp regresses]"
                } else {
                    ""
                };
                println!(
                    "#{:<4} {} / {} accepted as sequence {}{}",
                    index, stored.event.run_id, stored.event.id, stored.sequence, flag
                );
            }
            Err(err) => {
                rejected += 1;
                warn!(index, code = err.code(), "event rejected");
                println!("#{:<4} rejected: {}", index, describe(&err));
            }
        }
    }
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nl_ledger::InMemoryEventStore;
    use serde_json::json;
    use std::sync::Arc;

    fn raw(id: &str, event_type: &str) -> Value {
        json!({
            "id": id,
            "run_id": "run_1",
            "timestamp": "2026-02-16T13:00:00Z",
            "type": event_type,
            "actor": "agent",
            "title": "Step",
            "details": "Agent step.",
            "approval": {"status": "not_required"}
        })
    }

    #[test]
    fn arrays_are_ingested_in_order_and_rejections_counted() {
        let ledger = Ledger::new(Arc::new(InMemoryEventStore::new()));
        let batch = json!([raw("a", "intent"), raw("a", "intent"), raw("b", "summary"), raw("c", "action")]);
        let (accepted, rejected) = ingest(&ledger, batch);
        // Duplicate "a" and the post-summary "c" are refused.
        assert_eq!((accepted, rejected), (2, 2));
    }

    #[test]
    fn single_object_is_one_event() {
        let ledger = Ledger::new(Arc::new(InMemoryEventStore::new()));
        assert_eq!(ingest(&ledger, raw("a", "observation")), (1, 0));
    }
}
