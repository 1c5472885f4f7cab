// continuation.rs — Follow-on events after an approval is granted.
//
// A workflow can register a `Continuation` under its workflow id. When an
// approval request carrying that `meta.workflow` is approved, the strategy
// produces the events the workflow should append next. Strategies only
// describe events; appending them goes through the gated ledger.

use std::collections::HashMap;

use chrono::Duration;
use nl_ledger::{Actor, Event, EventType, Evidence, EvidenceKind, RiskLevel, StoredEvent};

/// What a continuation gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct ContinuationContext<'a> {
    /// The approval request that was approved.
    pub request: &'a StoredEvent,
    /// The resolution event just appended.
    pub resolution: &'a StoredEvent,
}

/// Produces follow-on events for one workflow.
pub trait Continuation: Send + Sync {
    /// Events to append, in order, after `ctx.resolution`.
    fn follow_up(&self, ctx: &ContinuationContext<'_>) -> Vec<Event>;
}

/// Continuations keyed by workflow id.
#[derive(Default)]
pub struct ContinuationRegistry {
    strategies: HashMap<String, Box<dyn Continuation>>,
}

impl ContinuationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in strategy.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TriageInboxContinuation::WORKFLOW, TriageInboxContinuation);
        registry
    }

    /// Register (or replace) the strategy for `workflow`.
    pub fn register(&mut self, workflow: impl Into<String>, strategy: impl Continuation + 'static) {
        self.strategies.insert(workflow.into(), Box::new(strategy));
    }

    pub fn get(&self, workflow: &str) -> Option<&dyn Continuation> {
        self.strategies.get(workflow).map(|s| s.as_ref())
    }

    pub fn workflows(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl std::fmt::Debug for ContinuationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuationRegistry")
            .field("workflows", &self.workflows())
            .finish()
    }
}

/// Resumes an inbox-triage run after its refund approval: one resume action,
/// then a completion summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriageInboxContinuation;

impl TriageInboxContinuation {
    pub const WORKFLOW: &'static str = "triage_inbox";
}

impl Continuation for TriageInboxContinuation {
    fn follow_up(&self, ctx: &ContinuationContext<'_>) -> Vec<Event> {
        let request = &ctx.request.event;
        let resolution = &ctx.resolution.event;
        let approver = resolution
            .approval
            .resolved_by
            .as_deref()
            .unwrap_or("human_reviewer");

        let mut resume = Event::new(
            format!("{}_resume", request.id),
            &request.run_id,
            resolution.timestamp + Duration::milliseconds(1),
            EventType::Action,
            Actor::Agent,
            "Resume triage after approval",
            format!("Approval granted by {approver}; continuing the gated action."),
        )
        .with_risk_level(request.risk_level.unwrap_or(RiskLevel::Medium))
        .with_evidence(Evidence::new(
            EvidenceKind::Log,
            "Approval resolution",
            format!("ledger://{}/{}", resolution.run_id, resolution.id),
        ))
        .with_meta(Self::WORKFLOW, "resume_after_approval");
        resume.confidence = request.confidence;

        let summary = Event::new(
            format!("{}_complete", request.id),
            &request.run_id,
            resolution.timestamp + Duration::milliseconds(2),
            EventType::Summary,
            Actor::Agent,
            "Triage complete",
            "Inbox triage finished after the approved action was executed.",
        )
        .with_meta(Self::WORKFLOW, "run_completed");

        vec![resume, summary]
    }
}
