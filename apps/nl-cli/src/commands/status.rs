// status.rs — Projected status of one run.

use crate::commands::{fail, open_ledger, print_json};
use crate::config::LedgerConfig;

pub fn execute(config: &LedgerConfig, run_id: &str, json: bool) -> anyhow::Result<()> {
    let ledger = open_ledger(config)?;
    let projection = ledger.run_status(run_id).map_err(fail)?;

    if json {
        return print_json(&projection);
    }

    println!("Run:     {}", run_id);
    println!("Status:  {}", projection.status);
    match &projection.pending_approval {
        Some(pending) => {
            println!("Pending approval:");
            println!("  Event:        {}", pending.event_id);
            println!(
                "  Requested by: {}",
                pending.requested_by.as_deref().unwrap_or("-")
            );
            println!(
                "  Requested at: {}",
                pending.requested_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("  Reason:       {}", pending.reason);
        }
        None => println!("Pending approval: none"),
    }
    Ok(())
}
