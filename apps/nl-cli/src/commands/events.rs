// events.rs — List ledger events in read order.

use crate::commands::{open_ledger, print_json, table_time};
use crate::config::LedgerConfig;

pub fn execute(config: &LedgerConfig, run: Option<&str>, json: bool) -> anyhow::Result<()> {
    let ledger = open_ledger(config)?;
    let events = match run {
        Some(run_id) => ledger.store().list_by_run_id(run_id)?,
        None => ledger.store().list_all()?,
    };

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }

    println!(
        "{:<6} {:<20} {:<16} {:<28} {:<19} {:<7} TITLE",
        "SEQ", "TIMESTAMP", "RUN", "EVENT", "TYPE", "ACTOR"
    );
    println!("{}", "-".repeat(110));
    for stored in &events {
        let event = &stored.event;
        println!(
            "{:<6} {:<20} {:<16} {:<28} {:<19} {:<7} {}{}",
            stored.sequence,
            table_time(&event.timestamp),
            event.run_id,
            event.id,
            event.event_type.as_str(),
            event.actor.to_string(),
            event.title,
            if stored.integrity_warning { "  [!]" } else { "" },
        );
    }
    println!("\n{} event(s).", events.len());
    Ok(())
}
