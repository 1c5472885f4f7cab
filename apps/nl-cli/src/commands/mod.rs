// mod.rs — Subcommand implementations and the helpers they share.

pub mod approval;
pub mod audit;
pub mod events;
pub mod ingest;
pub mod status;

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use nl_governance::{GovernanceError, Ledger};
use nl_ledger::SqliteEventStore;
use tracing::debug;

use crate::config::LedgerConfig;

/// Open (creating if needed) the configured ledger database.
pub fn open_ledger(config: &LedgerConfig) -> anyhow::Result<Arc<Ledger>> {
    if let Some(parent) = config.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteEventStore::open(&config.database)?;
    debug!(database = %config.database.display(), "ledger opened");
    Ok(Arc::new(Ledger::new(Arc::new(store))))
}

/// Render a governance error with its code and, for rule violations, every
/// broken rule.
pub fn describe(err: &GovernanceError) -> String {
    let mut text = format!("[{}] {}", err.code(), err);
    match err {
        GovernanceError::BusinessRule(violations) => {
            for v in violations {
                text.push_str(&format!(
                    "\n  {} {} at {}: {}",
                    v.rule_id, v.code, v.path, v.message
                ));
            }
        }
        GovernanceError::Ledger(nl_ledger::LedgerError::SchemaValidation(details)) => {
            for d in details {
                text.push_str(&format!("\n  {} at {}: {}", d.code, d.path, d.message));
            }
        }
        _ => {}
    }
    text
}

/// Convert a governance error for `anyhow` propagation.
pub fn fail(err: GovernanceError) -> anyhow::Error {
    anyhow::anyhow!(describe(&err))
}

/// Second-precision UTC time for table columns.
pub fn table_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Print a value as pretty JSON.
pub fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
