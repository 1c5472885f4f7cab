// audit.rs — Audit subcommands: verify, export.

use clap::Subcommand;
use nl_governance::export_decision_audit;
use nl_ledger::{verify_run, verify_store, LedgerError};
use tracing::error;

use crate::commands::{fail, open_ledger, print_json};
use crate::config::LedgerConfig;

#[derive(Subcommand)]
pub enum AuditCommands {
    /// Verify hash chain integrity of one run or the whole ledger.
    Verify {
        /// Only this run.
        #[arg(long)]
        run: Option<String>,
    },
    /// Export the verified trail of one policy decision as JSON.
    Export {
        /// Policy decision ID.
        decision: String,
    },
}

pub fn execute(cmd: &AuditCommands, config: &LedgerConfig) -> anyhow::Result<()> {
    let ledger = open_ledger(config)?;

    match cmd {
        AuditCommands::Verify { run } => {
            let result = match run {
                Some(run_id) => verify_run(ledger.store(), run_id).map(|report| vec![report]),
                None => verify_store(ledger.store()),
            };
            match result {
                Ok(reports) => {
                    if reports.is_empty() {
                        println!("No events recorded.");
                    }
                    for report in &reports {
                        println!(
                            "{:<24} {:>6} event(s)  head {}",
                            report.run_id,
                            report.event_count,
                            report.head_hash.as_deref().unwrap_or("-"),
                        );
                    }
                    println!("Hash chain intact for {} run(s).", reports.len());
                }
                Err(LedgerError::ChainBroken {
                    run_id,
                    event_id,
                    sequence,
                    reason,
                }) => {
                    error!(run_id = %run_id, event_id = %event_id, sequence, "hash chain broken");
                    println!("INTEGRITY VIOLATION in run {}:", run_id);
                    println!("  Event:    {} (sequence {})", event_id, sequence);
                    println!("  Problem:  {}", reason);
                    println!();
                    println!("The ledger may have been tampered with.");
                    anyhow::bail!("Ledger integrity check failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        AuditCommands::Export { decision } => {
            let audit = export_decision_audit(ledger.store(), decision).map_err(fail)?;
            print_json(&audit)?;
        }
    }

    Ok(())
}
