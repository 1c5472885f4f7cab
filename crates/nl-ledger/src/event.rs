// event.rs — Ledger event data model.
//
// Every intent, action, observation, decision, and approval an agent run
// produces is recorded as an Event. Events are caller-supplied and immutable
// once accepted: any later change of state (e.g., a rejection) is itself a
// new event appended to the same run.
//
// The JSON shape is the wire contract shared with the transport layer, so
// every field is serialized (including nulls) and unknown fields are rejected.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, ValidationDetail};

/// What kind of fact this event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Intent,
    Action,
    Observation,
    Decision,
    ApprovalRequested,
    ApprovalResolved,
    Error,
    Summary,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Intent => "intent",
            EventType::Action => "action",
            EventType::Observation => "observation",
            EventType::Decision => "decision",
            EventType::ApprovalRequested => "approval_requested",
            EventType::ApprovalResolved => "approval_resolved",
            EventType::Error => "error",
            EventType::Summary => "summary",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced the event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Agent,
    System,
    Human,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Agent => write!(f, "agent"),
            Actor::System => write!(f, "system"),
            Actor::Human => write!(f, "human"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Approval state carried on every event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::NotRequired => "not_required",
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    /// True for the two outcomes a human can resolve an approval to.
    pub fn is_resolved(&self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Log,
    Url,
    Artifact,
    Diff,
}

/// The approval sub-record of an event.
///
/// `decision_id` correlates zero or more ledger events to a single upstream
/// policy decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Approval {
    pub status: ApprovalStatus,
    #[serde(default)]
    pub decision_id: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default, with = "timestamp::option")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Approval {
    /// An approval block for events that need no human sign-off.
    pub fn not_required() -> Self {
        Self {
            status: ApprovalStatus::NotRequired,
            decision_id: None,
            requested_by: None,
            resolved_by: None,
            resolved_at: None,
            reason: None,
        }
    }

    /// A pending request raised by `requested_by`.
    pub fn pending(requested_by: impl Into<String>) -> Self {
        Self {
            status: ApprovalStatus::Pending,
            requested_by: Some(requested_by.into()),
            ..Self::not_required()
        }
    }

    /// A resolved approval (approved or rejected) signed off by `resolved_by`.
    pub fn resolved(
        status: ApprovalStatus,
        resolved_by: impl Into<String>,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            resolved_by: Some(resolved_by.into()),
            resolved_at: Some(resolved_at),
            ..Self::not_required()
        }
    }

    pub fn with_decision_id(mut self, decision_id: impl Into<String>) -> Self {
        self.decision_id = Some(decision_id.into());
        self
    }

    pub fn with_requested_by(mut self, requested_by: impl Into<String>) -> Self {
        self.requested_by = Some(requested_by.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A pointer to supporting material (log line, URL, artifact, diff).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub label: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl Evidence {
    pub fn new(kind: EvidenceKind, label: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            reference: reference.into(),
        }
    }
}

/// Which workflow (and which step of it) produced the event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EventMeta {
    pub workflow: String,
    pub step: String,
}

/// A single ledger event, as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Event {
    /// Unique within `run_id`.
    pub id: String,

    pub run_id: String,

    /// Always UTC; serialized with a `Z` suffix.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "type")]
    pub event_type: EventType,

    pub actor: Actor,

    pub title: String,

    pub details: String,

    #[serde(default)]
    pub confidence: Option<f64>,

    #[serde(default)]
    pub risk_level: Option<RiskLevel>,

    #[serde(default)]
    pub requires_approval: bool,

    pub approval: Approval,

    #[serde(default)]
    pub evidence: Vec<Evidence>,

    #[serde(default)]
    pub meta: Option<EventMeta>,
}

impl Event {
    /// Create an event with no approval requirement, evidence, or metadata.
    pub fn new(
        id: impl Into<String>,
        run_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        event_type: EventType,
        actor: Actor,
        title: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            timestamp,
            event_type,
            actor,
            title: title.into(),
            details: details.into(),
            confidence: None,
            risk_level: None,
            requires_approval: false,
            approval: Approval::not_required(),
            evidence: Vec::new(),
            meta: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    pub fn with_requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn with_approval(mut self, approval: Approval) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence.push(evidence);
        self
    }

    pub fn with_meta(mut self, workflow: impl Into<String>, step: impl Into<String>) -> Self {
        self.meta = Some(EventMeta {
            workflow: workflow.into(),
            step: step.into(),
        });
        self
    }

    /// Canonicalize the event before it is validated or stored.
    ///
    /// Trims the top-level text fields and truncates timestamps to
    /// microseconds, the precision of the persisted timestamp format.
    pub fn normalize(mut self) -> Self {
        self.id = self.id.trim().to_string();
        self.run_id = self.run_id.trim().to_string();
        self.title = self.title.trim().to_string();
        self.details = self.details.trim().to_string();
        self.timestamp = self.timestamp.trunc_subsecs(6);
        self.approval.resolved_at = self.approval.resolved_at.map(|at| at.trunc_subsecs(6));
        self
    }

    /// Check field-level constraints that serde's type checks cannot express.
    ///
    /// All problems are collected and returned together, sorted by path.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut details = Vec::new();

        if self.id.trim().is_empty() {
            details.push(ValidationDetail::new(
                "id",
                "id must not be empty",
                "MISSING_EVENT_ID",
            ));
        }
        if self.run_id.trim().is_empty() {
            details.push(ValidationDetail::new(
                "run_id",
                "run_id must not be empty",
                "MISSING_RUN_ID",
            ));
        }
        if self.title.trim().is_empty() {
            details.push(ValidationDetail::new(
                "title",
                "title must not be empty",
                "MISSING_TIMELINE_FIELDS",
            ));
        }
        if self.details.trim().is_empty() {
            details.push(ValidationDetail::new(
                "details",
                "details must not be empty",
                "MISSING_TIMELINE_FIELDS",
            ));
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                details.push(ValidationDetail::new(
                    "confidence",
                    "confidence must be between 0 and 1",
                    "INVALID_CONFIDENCE_BOUNDS",
                ));
            }
        }

        if details.is_empty() {
            Ok(())
        } else {
            details.sort_by(|a, b| a.path.cmp(&b.path));
            Err(LedgerError::SchemaValidation(details))
        }
    }

    /// The JSON payload of this event, as stored and hashed.
    pub fn payload(&self) -> Result<serde_json::Value, LedgerError> {
        Ok(serde_json::to_value(self)?)
    }

    /// True if this event asks for human approval.
    pub fn is_pending_signal(&self) -> bool {
        self.event_type == EventType::ApprovalRequested
            || (self.requires_approval && self.approval.status == ApprovalStatus::Pending)
    }

    /// True if this event resolves a previously requested approval.
    pub fn is_resolution_signal(&self) -> bool {
        self.event_type == EventType::ApprovalResolved
            || (self.requires_approval && self.approval.status.is_resolved())
    }

    /// The correlated policy decision id, if one is set and non-empty.
    pub fn decision_id(&self) -> Option<&str> {
        self.approval
            .decision_id
            .as_deref()
            .filter(|id| !id.is_empty())
    }

    pub fn workflow(&self) -> Option<&str> {
        self.meta.as_ref().map(|meta| meta.workflow.as_str())
    }

    pub fn step(&self) -> Option<&str> {
        self.meta.as_ref().map(|meta| meta.step.as_str())
    }
}

/// Parse, normalize, and validate a raw JSON payload into an [`Event`].
///
/// This is the entry point for untrusted input: type errors from serde and
/// field constraint failures both surface as `SchemaValidation`.
pub fn parse_event(value: serde_json::Value) -> Result<Event, LedgerError> {
    let event: Event = serde_json::from_value(value)
        .map_err(|err| LedgerError::SchemaValidation(vec![classify_serde_error(&err)]))?;
    let event = event.normalize();
    event.validate()?;
    Ok(event)
}

/// Map a serde failure onto the closest stable validation code.
fn classify_serde_error(err: &serde_json::Error) -> ValidationDetail {
    let message = err.to_string();

    if let Some(field) = backticked_after(&message, "missing field ") {
        let code = match field.as_str() {
            "id" => "MISSING_EVENT_ID",
            "run_id" => "MISSING_RUN_ID",
            "timestamp" => "MISSING_TIMESTAMP",
            "type" => "MISSING_EVENT_TYPE",
            "actor" => "MISSING_ACTOR",
            "title" | "details" => "MISSING_TIMELINE_FIELDS",
            "approval" => "MISSING_APPROVAL",
            _ => "MISSING_REQUIRED_FIELD",
        };
        return ValidationDetail::new(field, message, code);
    }
    if let Some(field) = backticked_after(&message, "unknown field ") {
        return ValidationDetail::new(field, message, "UNKNOWN_FIELD");
    }
    if message.contains("unknown variant") {
        return ValidationDetail::new("", message, "INVALID_ENUM_VALUE");
    }
    if message.contains(timestamp::INVALID_TIMESTAMP_MESSAGE) {
        return ValidationDetail::new("timestamp", message, "INVALID_TIMESTAMP");
    }
    ValidationDetail::new("", message, "SCHEMA_VALIDATION_ERROR")
}

/// Extract the `name` from messages like "missing field `name`".
fn backticked_after(message: &str, prefix: &str) -> Option<String> {
    let rest = message.split(prefix).nth(1)?;
    let rest = rest.strip_prefix('`')?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}

/// Timestamp wire format: RFC 3339, UTC, microseconds, `Z` suffix.
///
/// The format is fixed-width so the string form sorts the same way as the
/// instant it encodes (the SQLite store relies on this).
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) const INVALID_TIMESTAMP_MESSAGE: &str =
        "timestamp must be RFC 3339 and include timezone information";

    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Parse an RFC 3339 timestamp. A missing offset is an error; any offset
    /// is converted to UTC.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| format!("{}: '{}'", INVALID_TIMESTAMP_MESSAGE, raw))
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Same format for optional timestamps (`null` when absent).
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&super::format(value)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw {
                Some(raw) if !raw.trim().is_empty() => {
                    super::parse(&raw).map(Some).map_err(serde::de::Error::custom)
                }
                _ => Ok(None),
            }
        }
    }
}
