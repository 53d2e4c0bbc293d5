//! Trace persistence and step-to-event translation
//!
//! A `running` trace is written before each stage so observers see work in
//! progress, then replaced by the terminal trace. Agent steps are translated
//! into compact live events as they arrive; the trace remains the durable
//! record of the same information.

use crate::events::EventBus;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use triage_agent::AgentStep;
use triage_core::{
    EventKind, PipelineEvent, Result, Stage, StageStatus, StageTrace, ToolCallRecord, TriageError,
};
use triage_store::DocumentStore;

/// Collection holding one document per (ticket, stage)
pub const TRACES_COLLECTION: &str = "stage_traces";

/// Preview length for thinking events
const THINKING_PREVIEW_CHARS: usize = 160;

/// Preview length for a single parameter value in a tool_call event
const PARAM_VALUE_PREVIEW_CHARS: usize = 48;

/// At most this many key/value pairs appear in a tool_call summary
const MAX_PARAM_PAIRS: usize = 2;

/// Confidence below which human review is recommended
const REVIEW_CONFIDENCE: f64 = 0.6;

/// Writes stage traces and publishes live pipeline events
pub struct TraceRecorder {
    store: Arc<dyn DocumentStore>,
    bus: Arc<EventBus>,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn DocumentStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Publish an event without touching the store
    pub fn emit(&self, event: PipelineEvent) {
        self.bus.publish(event);
    }

    /// Write a `running` trace and announce the stage start
    pub async fn begin_stage(&self, ticket_id: &str, stage: Stage) -> Result<StageTrace> {
        let trace = StageTrace::running(ticket_id, stage);
        self.persist(&trace).await?;

        self.emit(
            PipelineEvent::new(
                ticket_id,
                EventKind::Status,
                format!("stage {} started", stage.name()),
            )
            .with_stage(stage),
        );

        tracing::info!(ticket_id, stage = %stage, "Stage started");
        Ok(trace)
    }

    /// Finalize a trace as `completed` and announce elapsed time
    pub async fn complete_stage(&self, mut trace: StageTrace) -> Result<StageTrace> {
        trace.status = StageStatus::Completed;
        self.stamp(&mut trace);
        self.persist(&trace).await?;

        let elapsed = trace.duration_ms.unwrap_or(0);
        self.emit(
            PipelineEvent::new(
                trace.ticket_id.clone(),
                EventKind::Complete,
                format!("stage {} completed in {}ms", trace.stage.name(), elapsed),
            )
            .with_stage(trace.stage)
            .with_detail(serde_json::json!({ "duration_ms": elapsed })),
        );

        tracing::info!(
            ticket_id = %trace.ticket_id,
            stage = %trace.stage,
            elapsed_ms = elapsed,
            "Stage completed"
        );
        Ok(trace)
    }

    /// Finalize a trace as `failed` with the error message
    pub async fn fail_stage(&self, mut trace: StageTrace, error: &str) -> Result<StageTrace> {
        trace.status = StageStatus::Failed;
        trace.note = Some(error.to_string());
        self.stamp(&mut trace);
        self.persist(&trace).await?;

        self.emit(
            PipelineEvent::new(
                trace.ticket_id.clone(),
                EventKind::Status,
                format!("stage {} failed: {}", trace.stage.name(), error),
            )
            .with_stage(trace.stage),
        );

        tracing::warn!(ticket_id = %trace.ticket_id, stage = %trace.stage, error, "Stage failed");
        Ok(trace)
    }

    /// Write a `skipped` trace carrying its justification
    pub async fn skip_stage(&self, ticket_id: &str, stage: Stage, reason: &str) -> Result<()> {
        let trace = StageTrace::skipped(ticket_id, stage, reason);
        self.persist(&trace).await?;

        self.emit(
            PipelineEvent::new(
                ticket_id,
                EventKind::Status,
                format!("stage {} skipped: {}", stage.name(), reason),
            )
            .with_stage(stage),
        );
        Ok(())
    }

    /// Translate one agent step into a live event and publish it
    pub fn record_step(&self, ticket_id: &str, stage: Stage, step: &AgentStep) {
        self.emit(step_event(ticket_id, stage, step));
    }

    /// Surface a parser fallback as a visible low-severity event
    pub fn record_degraded(&self, ticket_id: &str, stage: Stage) {
        self.emit(
            PipelineEvent::new(
                ticket_id,
                EventKind::Insight,
                "structured output missing, fallback defaults applied",
            )
            .with_stage(stage),
        );
    }

    /// Announce a phase-2 recovery
    pub fn record_recovery(&self, ticket_id: &str, stage: Stage, error: &str) {
        self.emit(
            PipelineEvent::new(
                ticket_id,
                EventKind::Status,
                format!("phase 2 failed, recovered with phase 1 result: {}", error),
            )
            .with_stage(stage),
        );
        tracing::warn!(ticket_id, stage = %stage, error, "Phase 2 recovered from phase 1");
    }

    /// Map numeric confidence to a qualitative bucket event
    pub fn emit_confidence(&self, ticket_id: &str, stage: Stage, confidence: f64) {
        let bucket = confidence_bucket(confidence);
        let needs_review = confidence < REVIEW_CONFIDENCE;

        self.emit(
            PipelineEvent::new(
                ticket_id,
                EventKind::Confidence,
                format!("confidence {:.2} ({})", confidence, bucket),
            )
            .with_stage(stage)
            .with_detail(serde_json::json!({
                "confidence": confidence,
                "bucket": bucket,
                "needs_review": needs_review,
            })),
        );
    }

    fn stamp(&self, trace: &mut StageTrace) {
        let now = Utc::now();
        trace.completed_at = Some(now);
        trace.duration_ms = Some(
            now.signed_duration_since(trace.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
    }

    async fn persist(&self, trace: &StageTrace) -> Result<()> {
        let doc = serde_json::to_value(trace)?;
        self.store
            .upsert(TRACES_COLLECTION, &trace.key(), doc)
            .await
            .map_err(|e| TriageError::Store(format!("Failed to persist trace: {}", e)))
    }
}

/// Translate one agent step into a [`PipelineEvent`], pure and testable
pub fn step_event(ticket_id: &str, stage: Stage, step: &AgentStep) -> PipelineEvent {
    match step {
        AgentStep::Reasoning { text } => PipelineEvent::new(
            ticket_id,
            EventKind::Thinking,
            truncate(text, THINKING_PREVIEW_CHARS),
        )
        .with_stage(stage),
        AgentStep::ToolCall { tool, params } => PipelineEvent::new(
            ticket_id,
            EventKind::ToolCall,
            format!("{}({})", tool, summarize_params(params)),
        )
        .with_stage(stage),
        AgentStep::ToolResult { tool, result } => PipelineEvent::new(
            ticket_id,
            EventKind::ToolResult,
            format!("{} -> {}", tool, summarize_result(result)),
        )
        .with_stage(stage),
    }
}

/// Extract the reasoning strings and tool-call records from a step log
///
/// Tool results are attached to the most recent unmatched call for the same
/// tool, as a one-line summary.
pub fn collect_trace_fields(steps: &[AgentStep]) -> (Vec<String>, Vec<ToolCallRecord>) {
    let mut reasoning = Vec::new();
    let mut tool_calls: Vec<ToolCallRecord> = Vec::new();

    for step in steps {
        match step {
            AgentStep::Reasoning { text } => reasoning.push(text.clone()),
            AgentStep::ToolCall { tool, params } => tool_calls.push(ToolCallRecord {
                tool: tool.clone(),
                params: params.clone(),
                result_summary: String::new(),
            }),
            AgentStep::ToolResult { tool, result } => {
                if let Some(record) = tool_calls
                    .iter_mut()
                    .rev()
                    .find(|r| r.tool == *tool && r.result_summary.is_empty())
                {
                    record.result_summary = summarize_result(result);
                }
            }
        }
    }

    (reasoning, tool_calls)
}

/// Compact parameter summary: at most two key/value pairs, values truncated,
/// with an ellipsis marker when more were supplied
pub fn summarize_params(params: &Value) -> String {
    let Some(map) = params.as_object() else {
        return truncate(&params.to_string(), PARAM_VALUE_PREVIEW_CHARS);
    };

    let mut parts: Vec<String> = map
        .iter()
        .take(MAX_PARAM_PAIRS)
        .map(|(k, v)| {
            let rendered = match v.as_str() {
                Some(s) => s.to_string(),
                None => v.to_string(),
            };
            format!("{}={}", k, truncate(&rendered, PARAM_VALUE_PREVIEW_CHARS))
        })
        .collect();

    if map.len() > MAX_PARAM_PAIRS {
        parts.push("…".to_string());
    }

    parts.join(", ")
}

/// One-line count summary of a tool result
pub fn summarize_result(result: &Value) -> String {
    if let Some(docs) = result.get("documents").and_then(Value::as_array) {
        return format!("{} documents", docs.len());
    }
    if let Some(rows) = result.get("rows").and_then(Value::as_array) {
        return format!("{} rows", rows.len());
    }
    if let Some(count) = result.get("count").and_then(Value::as_u64) {
        return format!("{} results", count);
    }
    if let Some(items) = result.as_array() {
        return format!("{} results", items.len());
    }
    "1 result".to_string()
}

/// Qualitative bucket for a numeric confidence
pub fn confidence_bucket(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        "high"
    } else if confidence >= 0.6 {
        "medium"
    } else if confidence >= 0.4 {
        "low"
    } else {
        "critical"
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use triage_store::MemoryStore;

    fn recorder() -> (TraceRecorder, Arc<MemoryStore>, Arc<EventBus>) {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        (
            TraceRecorder::new(store.clone(), bus.clone()),
            store,
            bus,
        )
    }

    #[tokio::test]
    async fn test_running_trace_precedes_terminal_trace() {
        let (recorder, store, _) = recorder();

        let trace = recorder.begin_stage("t-1", Stage::Classify).await.unwrap();
        let stored = store.get(TRACES_COLLECTION, "t-1:classify").await.unwrap();
        assert_eq!(stored["status"], "running");

        recorder.complete_stage(trace).await.unwrap();
        let stored = store.get(TRACES_COLLECTION, "t-1:classify").await.unwrap();
        assert_eq!(stored["status"], "completed");
        assert!(stored["duration_ms"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_fail_stage_records_error() {
        let (recorder, store, _) = recorder();

        let trace = recorder.begin_stage("t-1", Stage::Decide).await.unwrap();
        recorder.fail_stage(trace, "agent unreachable").await.unwrap();

        let stored = store.get(TRACES_COLLECTION, "t-1:decide").await.unwrap();
        assert_eq!(stored["status"], "failed");
        assert_eq!(stored["note"], "agent unreachable");
    }

    #[tokio::test]
    async fn test_skip_stage_writes_justification() {
        let (recorder, store, bus) = recorder();
        let mut rx = bus.subscribe("t-1");
        rx.recv().await.unwrap(); // connected

        recorder
            .skip_stage("t-1", Stage::Project, "simple ticket, high confidence")
            .await
            .unwrap();

        let stored = store.get(TRACES_COLLECTION, "t-1:project").await.unwrap();
        assert_eq!(stored["status"], "skipped");
        assert_eq!(stored["note"], "simple ticket, high confidence");

        let event = rx.recv().await.unwrap();
        assert!(event.message.contains("skipped"));
    }

    #[test]
    fn test_thinking_event_truncated() {
        let long = "x".repeat(500);
        let event = step_event(
            "t-1",
            Stage::Classify,
            &AgentStep::Reasoning { text: long },
        );
        assert_eq!(event.kind, EventKind::Thinking);
        assert!(event.message.chars().count() <= THINKING_PREVIEW_CHARS + 1);
        assert!(event.message.ends_with('…'));
    }

    #[test]
    fn test_tool_call_summary_caps_pairs() {
        let summary = summarize_params(&json!({
            "a": "1", "b": "2", "c": "3", "d": "4"
        }));
        assert_eq!(summary, "a=1, b=2, …");
    }

    #[test]
    fn test_tool_call_summary_truncates_values() {
        let summary = summarize_params(&json!({ "query": "q".repeat(200) }));
        assert!(summary.starts_with("query="));
        assert!(summary.contains('…'));
    }

    #[test]
    fn test_result_summaries() {
        assert_eq!(
            summarize_result(&json!({"documents": [1, 2, 3]})),
            "3 documents"
        );
        assert_eq!(summarize_result(&json!({"rows": [1]})), "1 rows");
        assert_eq!(summarize_result(&json!({"count": 7})), "7 results");
        assert_eq!(summarize_result(&json!([1, 2])), "2 results");
        assert_eq!(summarize_result(&json!({"ok": true})), "1 result");
    }

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(confidence_bucket(0.95), "high");
        assert_eq!(confidence_bucket(0.8), "high");
        assert_eq!(confidence_bucket(0.7), "medium");
        assert_eq!(confidence_bucket(0.5), "low");
        assert_eq!(confidence_bucket(0.1), "critical");
    }

    #[test]
    fn test_collect_trace_fields_pairs_results() {
        let steps = vec![
            AgentStep::Reasoning {
                text: "looking up order".to_string(),
            },
            AgentStep::ToolCall {
                tool: "lookup_order".to_string(),
                params: json!({"order_id": "o-1"}),
            },
            AgentStep::ToolResult {
                tool: "lookup_order".to_string(),
                result: json!({"rows": [1, 2]}),
            },
        ];

        let (reasoning, tool_calls) = collect_trace_fields(&steps);
        assert_eq!(reasoning, vec!["looking up order"]);
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].result_summary, "2 rows");
    }

    #[tokio::test]
    async fn test_confidence_event_flags_review() {
        let (recorder, _, bus) = recorder();
        let mut rx = bus.subscribe("t-1");
        rx.recv().await.unwrap();

        recorder.emit_confidence("t-1", Stage::Decide, 0.45);
        let event = rx.recv().await.unwrap();

        assert_eq!(event.kind, EventKind::Confidence);
        let detail = event.detail.unwrap();
        assert_eq!(detail["bucket"], "low");
        assert_eq!(detail["needs_review"], true);
    }
}
