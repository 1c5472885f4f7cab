// approval.rs — Approval subcommands: list, register, resolve, state.

use clap::{Args, Subcommand};
use nl_governance::{
    ApprovalRequest, ApprovalTarget, ApprovalWorkflow, Decision, GovernanceError, Resolution,
};
use nl_ledger::RiskLevel;
use tracing::error;

use crate::commands::{describe, fail, open_ledger, print_json, table_time};
use crate::config::LedgerConfig;

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List every run waiting on an approval.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Register a pending approval for a policy decision.
    Register {
        /// Upstream policy decision ID.
        #[arg(long)]
        decision: String,
        /// Run the approval pauses.
        #[arg(long)]
        run: String,
        /// Who asks for approval.
        #[arg(long, default_value = "agent")]
        requested_by: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        details: String,
        /// low, medium, or high.
        #[arg(long, default_value = "high", value_parser = parse_risk)]
        risk: RiskLevel,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Approve or reject a pending approval.
    Resolve {
        #[command(flatten)]
        target: TargetArgs,
        /// approved or rejected.
        #[arg(long)]
        decision: Decision,
        /// Who signs off.
        #[arg(long)]
        approver: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Show the lifecycle of a policy decision.
    State {
        /// Policy decision ID.
        decision: String,
    },
}

/// Exactly one way to identify the approval.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Ledger event ID of the pending request.
    #[arg(long)]
    event_id: Option<String>,
    /// Policy decision ID carried by the pending request.
    #[arg(long)]
    decision_id: Option<String>,
}

impl TargetArgs {
    fn target(&self) -> anyhow::Result<ApprovalTarget> {
        match (&self.event_id, &self.decision_id) {
            (Some(id), None) => Ok(ApprovalTarget::EventId(id.clone())),
            (None, Some(id)) => Ok(ApprovalTarget::DecisionId(id.clone())),
            _ => anyhow::bail!("pass exactly one of --event-id or --decision-id"),
        }
    }
}

fn parse_risk(raw: &str) -> Result<RiskLevel, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
        .map_err(|_| format!("unknown risk level '{raw}' (expected low, medium, or high)"))
}

pub fn execute(cmd: &ApprovalCommands, config: &LedgerConfig) -> anyhow::Result<()> {
    let workflow = ApprovalWorkflow::new(open_ledger(config)?);

    match cmd {
        ApprovalCommands::List { json } => list_pending(&workflow, *json),
        ApprovalCommands::Register {
            decision,
            run,
            requested_by,
            title,
            details,
            risk,
            reason,
        } => {
            let registered = workflow
                .register_pending_approval(&ApprovalRequest {
                    decision_id: decision.clone(),
                    run_id: run.clone(),
                    requested_by: requested_by.clone(),
                    title: title.clone(),
                    details: details.clone(),
                    risk_level: *risk,
                    reason: reason.clone(),
                })
                .map_err(fail)?;
            println!(
                "Registered pending approval {} for decision {} on run {}.",
                registered.event_id, registered.decision_id, registered.run_id
            );
            Ok(())
        }
        ApprovalCommands::Resolve {
            target,
            decision,
            approver,
            reason,
        } => {
            let mut resolution = Resolution::new(*decision, approver.clone());
            resolution.reason = reason.clone();
            resolve(&workflow, &target.target()?, &resolution)
        }
        ApprovalCommands::State { decision } => {
            let state = workflow.approval_decision_state(decision).map_err(fail)?;
            print_json(&state)
        }
    }
}

fn list_pending(workflow: &ApprovalWorkflow, json: bool) -> anyhow::Result<()> {
    let pending = workflow.list_pending_approvals().map_err(fail)?;
    if json {
        return print_json(&pending);
    }
    if pending.is_empty() {
        println!("No pending approvals.");
        return Ok(());
    }

    println!(
        "{:<20} {:<16} {:<44} {:<16} {:<6} TITLE",
        "REQUESTED", "RUN", "EVENT", "DECISION", "RISK"
    );
    println!("{}", "-".repeat(120));
    for p in &pending {
        println!(
            "{:<20} {:<16} {:<44} {:<16} {:<6} {}",
            table_time(&p.requested_at),
            p.run_id,
            p.event_id,
            p.decision_id.as_deref().unwrap_or("-"),
            p.risk_level.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            p.title,
        );
    }
    println!("\n{} pending approval(s).", pending.len());
    Ok(())
}

fn resolve(
    workflow: &ApprovalWorkflow,
    target: &ApprovalTarget,
    resolution: &Resolution,
) -> anyhow::Result<()> {
    match workflow.resolve(target, resolution) {
        Ok(outcome) => {
            println!(
                "Resolved {} as {} ({}), recorded as {}.",
                outcome.target_event_id, outcome.decision, outcome.state_transition, outcome.event_id
            );
            for id in &outcome.continuation_event_ids {
                println!("  continued with {}", id);
            }
            Ok(())
        }
        Err(GovernanceError::ContinuationFailed { resolution, source }) => {
            error!(
                run_id = %resolution.run_id,
                event_id = %resolution.event_id,
                code = source.code(),
                "post-approval continuation failed"
            );
            println!(
                "Resolved {} as {}, recorded as {}.",
                resolution.target_event_id, resolution.decision, resolution.event_id
            );
            anyhow::bail!("post-approval continuation failed: {}", describe(&source))
        }
        Err(err) => Err(fail(err)),
    }
}
