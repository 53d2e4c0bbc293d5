//! Type definitions for tickets, stage traces, pipeline events and debates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The ordered stages of the resolution pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Classify,
    GatherContext,
    Decide,
    Negotiate,
    Project,
    Execute,
    AssessQuality,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 7] = [
        Stage::Classify,
        Stage::GatherContext,
        Stage::Decide,
        Stage::Negotiate,
        Stage::Project,
        Stage::Execute,
        Stage::AssessQuality,
    ];

    /// Stable stage name used in trace documents and events
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::GatherContext => "gather-context",
            Stage::Decide => "decide",
            Stage::Negotiate => "negotiate",
            Stage::Project => "project",
            Stage::Execute => "execute",
            Stage::AssessQuality => "assess-quality",
        }
    }

    /// 1-based position in the pipeline
    pub fn ordinal(&self) -> u32 {
        match self {
            Stage::Classify => 1,
            Stage::GatherContext => 2,
            Stage::Decide => 3,
            Stage::Negotiate => 4,
            Stage::Project => 5,
            Stage::Execute => 6,
            Stage::AssessQuality => 7,
        }
    }

    /// Stages strictly after this one, in pipeline order
    pub fn remaining(&self) -> &'static [Stage] {
        let idx = (self.ordinal()) as usize;
        &Stage::ALL[idx..]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    #[default]
    New,
    Processing,
    Resolved,
    Escalated,
}

impl TicketStatus {
    /// Terminal states are `resolved` and `escalated`
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Escalated)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TicketStatus::New => "new",
            TicketStatus::Processing => "processing",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Escalated => "escalated",
        };
        write!(f, "{}", s)
    }
}

/// Ticket priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Customer sentiment as classified by the first stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
    Angry,
}

impl Sentiment {
    /// Angry or negative tickets qualify for the debate sentiment boost
    pub fn is_negative(&self) -> bool {
        matches!(self, Sentiment::Negative | Sentiment::Angry)
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            "angry" => Ok(Sentiment::Angry),
            _ => Err(format!("Invalid sentiment: {}", s)),
        }
    }
}

/// Request payload for submitting a new ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRequest {
    pub customer_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    pub subject: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// A customer support ticket
///
/// Created once at submission, mutated by every stage. Terminal states are
/// `resolved` and `escalated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub customer_id: String,
    pub order_id: Option<String>,
    pub subject: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub status: TicketStatus,
    pub resolution: Option<String>,
    pub confidence: Option<f64>,
    pub automated: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create a new ticket from a submission request
    pub fn from_request(request: TicketRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: request.customer_id,
            order_id: request.order_id,
            subject: request.subject,
            description: request.description,
            category: request.category.unwrap_or_else(|| "general".to_string()),
            priority: request.priority,
            status: TicketStatus::New,
            resolution: None,
            confidence: None,
            automated: false,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Mark the ticket terminal with a resolution
    pub fn close(&mut self, status: TicketStatus, resolution: String, confidence: Option<f64>) {
        self.status = status;
        self.resolution = Some(resolution);
        self.confidence = confidence;
        self.resolved_at = Some(Utc::now());
    }
}

/// Status of a single stage trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

/// A tool invocation recorded inside a stage trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub params: Value,
    pub result_summary: String,
}

/// Durable record of one (ticket, stage) execution
///
/// A `running` trace is written before the agent call and replaced by a
/// terminal trace afterwards. Keyed by `(ticket_id, stage)` so retries
/// overwrite rather than duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTrace {
    pub ticket_id: String,
    pub stage: Stage,
    pub ordinal: u32,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub reasoning: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: Option<String>,
    pub result: Option<Value>,
    pub confidence: Option<f64>,
    pub raw_text: Option<String>,
    /// Skip justification or failure message
    pub note: Option<String>,
}

impl StageTrace {
    /// Create an in-progress trace with empty fields
    pub fn running(ticket_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            stage,
            ordinal: stage.ordinal(),
            status: StageStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            reasoning: Vec::new(),
            tool_calls: Vec::new(),
            calls: 0,
            input_tokens: 0,
            output_tokens: 0,
            model: None,
            result: None,
            confidence: None,
            raw_text: None,
            note: None,
        }
    }

    /// Create a skipped trace carrying its justification
    pub fn skipped(ticket_id: impl Into<String>, stage: Stage, reason: impl Into<String>) -> Self {
        let mut trace = Self::running(ticket_id, stage);
        trace.status = StageStatus::Skipped;
        trace.completed_at = Some(trace.started_at);
        trace.duration_ms = Some(0);
        trace.note = Some(reason.into());
        trace
    }

    /// Document key for store upserts: `(ticket_id, stage_name)`
    pub fn doc_key(ticket_id: &str, stage: Stage) -> String {
        format!("{}:{}", ticket_id, stage.name())
    }

    pub fn key(&self) -> String {
        Self::doc_key(&self.ticket_id, self.stage)
    }
}

/// The structured object recovered from a stage's agent output
///
/// `degraded` is true when the value came from fallback defaults rather than
/// successful parsing, so downstream consumers can discount it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub value: Value,
    pub degraded: bool,
}

impl StageResult {
    pub fn parsed(value: Value) -> Self {
        Self {
            value,
            degraded: false,
        }
    }

    pub fn degraded(value: Value) -> Self {
        Self {
            value,
            degraded: true,
        }
    }

    /// Confidence from the result's own `confidence` or `quality_score` field
    pub fn confidence(&self) -> Option<f64> {
        self.value
            .get("confidence")
            .or_else(|| self.value.get("quality_score"))
            .and_then(Value::as_f64)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(Value::as_str)
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.value.get(key).and_then(Value::as_bool)
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.value.get(key).and_then(Value::as_f64)
    }

    /// Fill any keys absent from this result with values from `defaults`
    pub fn fill_defaults(&mut self, defaults: &Value) {
        if let (Some(map), Some(default_map)) = (self.value.as_object_mut(), defaults.as_object())
        {
            for (k, v) in default_map {
                map.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
    }
}

/// Kind of a live pipeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Thinking,
    ToolCall,
    ToolResult,
    Decision,
    Status,
    Insight,
    Complete,
    Debate,
    Confidence,
    ToolSynthesis,
}

/// A live, fine-grained event published on a per-ticket channel
///
/// Ephemeral by design; the StageTrace is the durable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub ticket_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub stage: Option<String>,
    pub ordinal: Option<u32>,
    pub message: String,
    pub detail: Option<Value>,
}

impl PipelineEvent {
    pub fn new(ticket_id: impl Into<String>, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            timestamp: Utc::now(),
            kind,
            stage: None,
            ordinal: None,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage.name().to_string());
        self.ordinal = Some(stage.ordinal());
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Per-stage token accounting for a single ticket run
///
/// Used only for end-of-run reporting, never enforcement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBudget {
    pub per_stage: Vec<(String, u64)>,
}

impl TokenBudget {
    pub fn record(&mut self, stage: Stage, input_tokens: u64, output_tokens: u64) {
        self.per_stage
            .push((stage.name().to_string(), input_tokens + output_tokens));
    }

    pub fn total(&self) -> u64 {
        self.per_stage.iter().map(|(_, t)| t).sum()
    }
}

/// The two negotiating roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateRole {
    /// Optimizes customer satisfaction and retention
    Generous,
    /// Optimizes cost and policy compliance
    Conservative,
}

impl std::fmt::Display for DebateRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DebateRole::Generous => write!(f, "generous"),
            DebateRole::Conservative => write!(f, "conservative"),
        }
    }
}

/// Winner of a debate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateWinner {
    Generous,
    Conservative,
    Consensus,
}

/// Action parameters proposed during decision and negotiation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gesture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expedite: Option<bool>,
}

impl ActionParams {
    /// Merge with winner precedence: winner's values for shared keys,
    /// loser only fills gaps.
    pub fn merged(winner: &Self, loser: &Self) -> Self {
        Self {
            amount: winner.amount.or(loser.amount),
            percentage: winner.percentage.or(loser.percentage),
            gesture: winner.gesture.clone().or_else(|| loser.gesture.clone()),
            expedite: winner.expedite.or(loser.expedite),
        }
    }

    /// Extract parameters from a loosely structured agent result
    pub fn from_value(value: &Value) -> Self {
        Self {
            amount: value.get("amount").and_then(Value::as_f64),
            percentage: value.get("percentage").and_then(Value::as_f64),
            gesture: value
                .get("gesture")
                .and_then(Value::as_str)
                .map(str::to_string),
            expedite: value.get("expedite").and_then(Value::as_bool),
        }
    }
}

/// The proposal the debate starts from (the decide stage's output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateProposal {
    pub action: String,
    pub reasoning: String,
    pub params: ActionParams,
}

/// One turn in the negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTurn {
    pub role: DebateRole,
    pub round: u8,
    pub argument: String,
    pub action: String,
    pub params: ActionParams,
    pub confidence: f64,
    pub key_points: Vec<String>,
}

/// Immutable record of a completed two-round negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTranscript {
    pub initial: DebateProposal,
    pub turns: Vec<DebateTurn>,
    pub consensus: bool,
    pub winner: DebateWinner,
    pub final_action: String,
    pub final_params: ActionParams,
    pub rationale: String,
    /// Concrete changes versus the initial proposal, for auditability
    pub changes: Vec<String>,
}

/// Contextual flags that feed the debate scoring boosts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DebateContext {
    pub vip: bool,
    pub sentiment: Sentiment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_names() {
        assert_eq!(Stage::Classify.ordinal(), 1);
        assert_eq!(Stage::AssessQuality.ordinal(), 7);
        assert_eq!(Stage::GatherContext.name(), "gather-context");

        let ordinals: Vec<u32> = Stage::ALL.iter().map(|s| s.ordinal()).collect();
        let mut sorted = ordinals.clone();
        sorted.sort_unstable();
        assert_eq!(ordinals, sorted);
    }

    #[test]
    fn test_stage_remaining() {
        assert_eq!(
            Stage::GatherContext.remaining(),
            &[
                Stage::Decide,
                Stage::Negotiate,
                Stage::Project,
                Stage::Execute,
                Stage::AssessQuality
            ]
        );
        assert!(Stage::AssessQuality.remaining().is_empty());
    }

    #[test]
    fn test_ticket_from_request() {
        let ticket = Ticket::from_request(TicketRequest {
            customer_id: "cust-1".to_string(),
            order_id: Some("ord-9".to_string()),
            subject: "Broken blender".to_string(),
            description: "Arrived cracked".to_string(),
            category: None,
            priority: Priority::High,
        });

        assert_eq!(ticket.status, TicketStatus::New);
        assert_eq!(ticket.category, "general");
        assert!(!ticket.automated);
        assert!(ticket.resolved_at.is_none());
    }

    #[test]
    fn test_ticket_close() {
        let mut ticket = Ticket::from_request(TicketRequest {
            customer_id: "cust-1".to_string(),
            order_id: None,
            subject: "s".to_string(),
            description: "d".to_string(),
            category: Some("refund".to_string()),
            priority: Priority::Normal,
        });

        ticket.close(TicketStatus::Resolved, "Refund issued".to_string(), Some(0.9));
        assert!(ticket.status.is_terminal());
        assert_eq!(ticket.resolution.as_deref(), Some("Refund issued"));
        assert!(ticket.resolved_at.is_some());
    }

    #[test]
    fn test_trace_doc_key() {
        let trace = StageTrace::running("t-1", Stage::Decide);
        assert_eq!(trace.key(), "t-1:decide");
        assert_eq!(trace.status, StageStatus::Running);
        assert!(!trace.status.is_terminal());
    }

    #[test]
    fn test_skipped_trace_carries_reason() {
        let trace = StageTrace::skipped("t-1", Stage::Project, "simple ticket, high confidence");
        assert_eq!(trace.status, StageStatus::Skipped);
        assert!(trace.status.is_terminal());
        assert_eq!(
            trace.note.as_deref(),
            Some("simple ticket, high confidence")
        );
    }

    #[test]
    fn test_stage_result_confidence_fallback() {
        let r = StageResult::parsed(serde_json::json!({"quality_score": 0.7}));
        assert_eq!(r.confidence(), Some(0.7));

        let r = StageResult::parsed(serde_json::json!({"confidence": 0.9, "quality_score": 0.1}));
        assert_eq!(r.confidence(), Some(0.9));
    }

    #[test]
    fn test_stage_result_fill_defaults() {
        let mut r = StageResult::parsed(serde_json::json!({"action": "refund"}));
        r.fill_defaults(&serde_json::json!({"action": "escalate", "confidence": 0.5}));

        assert_eq!(r.str_field("action"), Some("refund"));
        assert_eq!(r.f64_field("confidence"), Some(0.5));
    }

    #[test]
    fn test_params_merge_winner_precedence() {
        let winner = ActionParams {
            amount: Some(2.0),
            ..Default::default()
        };
        let loser = ActionParams {
            amount: Some(1.0),
            percentage: Some(3.0),
            ..Default::default()
        };

        let merged = ActionParams::merged(&winner, &loser);
        assert_eq!(merged.amount, Some(2.0));
        assert_eq!(merged.percentage, Some(3.0));
    }

    #[test]
    fn test_params_from_value() {
        let params = ActionParams::from_value(&serde_json::json!({
            "amount": 80.0,
            "gesture": "10% coupon",
            "irrelevant": true,
        }));

        assert_eq!(params.amount, Some(80.0));
        assert_eq!(params.gesture.as_deref(), Some("10% coupon"));
        assert_eq!(params.expedite, None);
    }

    #[test]
    fn test_sentiment_boost_eligibility() {
        assert!(Sentiment::Angry.is_negative());
        assert!(Sentiment::Negative.is_negative());
        assert!(!Sentiment::Neutral.is_negative());
        assert_eq!("angry".parse::<Sentiment>().unwrap(), Sentiment::Angry);
        assert!("furious".parse::<Sentiment>().is_err());
    }

    #[test]
    fn test_event_builder() {
        let event = PipelineEvent::new("t-1", EventKind::Thinking, "analyzing ticket")
            .with_stage(Stage::Classify)
            .with_detail(serde_json::json!({"len": 12}));

        assert_eq!(event.stage.as_deref(), Some("classify"));
        assert_eq!(event.ordinal, Some(1));
        assert!(event.detail.is_some());
    }

    #[test]
    fn test_token_budget_total() {
        let mut budget = TokenBudget::default();
        budget.record(Stage::Classify, 100, 50);
        budget.record(Stage::Decide, 200, 100);
        assert_eq!(budget.total(), 450);
        assert_eq!(budget.per_stage.len(), 2);
    }

    #[test]
    fn test_event_kind_serde_names() {
        let json = serde_json::to_string(&EventKind::ToolSynthesis).unwrap();
        assert_eq!(json, "\"tool_synthesis\"");
        let json = serde_json::to_string(&Stage::AssessQuality).unwrap();
        assert_eq!(json, "\"assess-quality\"");
    }
}
