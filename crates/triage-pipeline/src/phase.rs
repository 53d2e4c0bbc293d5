//! Multi-phase stage execution with recovery
//!
//! A stage runs as one or more sequential phases against the remote agent,
//! all sharing one conversation handle so the agent retains context. Phase-1
//! failure fails the stage. A later phase failing recovers to the last good
//! parsed result, augmented with stage-appropriate defaults, and the stage
//! still completes: partial information enables downstream progress.

use crate::recorder::{collect_trace_fields, TraceRecorder};
use serde_json::Value;
use std::sync::Arc;
use triage_agent::{
    merge_steps, merge_usage, parse_structured, AgentClient, AgentStep, AgentUsage,
    ConverseResponse,
};
use triage_core::{Result, Stage, StageResult, StageTrace, TriageError};

/// Merged result of all phases of one stage
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub result: StageResult,
    pub usage: AgentUsage,
    pub steps: Vec<AgentStep>,
    pub conversation_id: String,
    pub raw_text: String,
    /// True when a later phase failed and the stage fell back to phase 1
    pub recovered: bool,
}

/// Executes the phases of a stage against the remote agent
pub struct PhaseRunner {
    agent: Arc<dyn AgentClient>,
    recorder: Arc<TraceRecorder>,
    agent_id: String,
}

impl PhaseRunner {
    pub fn new(
        agent: Arc<dyn AgentClient>,
        recorder: Arc<TraceRecorder>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            recorder,
            agent_id: agent_id.into(),
        }
    }

    /// Run a single-phase stage
    pub async fn run_single(
        &self,
        ticket_id: &str,
        stage: Stage,
        prompt: &str,
        fallback: Value,
    ) -> Result<PhaseOutcome> {
        let (result, response) = self
            .call_phase(ticket_id, stage, prompt, None, fallback)
            .await?;

        Ok(PhaseOutcome {
            result,
            usage: response.usage,
            steps: response.steps,
            conversation_id: response.conversation_id,
            raw_text: response.message,
            recovered: false,
        })
    }

    /// Run a two-phase stage: a rapid initial answer, then a validate/refine
    /// pass on the same conversation using phase 1's parsed output.
    ///
    /// Phase-2 failure (transport, timeout, or unparseable output where
    /// phase 1 parsed cleanly) recovers to phase 1's result plus
    /// `recovery_defaults`, and the stage completes.
    pub async fn run_refined<F>(
        &self,
        ticket_id: &str,
        stage: Stage,
        prompt: &str,
        refine_prompt: F,
        fallback: Value,
        recovery_defaults: Value,
    ) -> Result<PhaseOutcome>
    where
        F: FnOnce(&Value) -> String,
    {
        let (phase1, response1) = self
            .call_phase(ticket_id, stage, prompt, None, fallback.clone())
            .await?;

        let refine = refine_prompt(&phase1.value);
        let phase2_attempt = self
            .call_phase(
                ticket_id,
                stage,
                &refine,
                Some(response1.conversation_id.as_str()),
                fallback,
            )
            .await;

        match phase2_attempt {
            Ok((phase2, response2)) if !phase2.degraded || phase1.degraded => Ok(PhaseOutcome {
                result: phase2,
                usage: merge_usage(&response1.usage, &response2.usage),
                steps: merge_steps(response1.steps, response2.steps),
                conversation_id: response2.conversation_id,
                raw_text: response2.message,
                recovered: false,
            }),
            Ok((_, response2)) => {
                // Phase 2 produced nothing parseable while phase 1 was clean
                self.recorder
                    .record_recovery(ticket_id, stage, "phase 2 output unparseable");

                let mut result = phase1;
                result.fill_defaults(&recovery_defaults);

                Ok(PhaseOutcome {
                    result,
                    usage: merge_usage(&response1.usage, &response2.usage),
                    steps: merge_steps(response1.steps, response2.steps),
                    conversation_id: response1.conversation_id,
                    raw_text: response1.message,
                    recovered: true,
                })
            }
            Err(e) => {
                self.recorder
                    .record_recovery(ticket_id, stage, &e.to_string());

                let mut result = phase1;
                result.fill_defaults(&recovery_defaults);

                Ok(PhaseOutcome {
                    result,
                    usage: response1.usage,
                    steps: response1.steps,
                    conversation_id: response1.conversation_id,
                    raw_text: response1.message,
                    recovered: true,
                })
            }
        }
    }

    /// Run an N-phase research stage: every phase continues the same
    /// conversation, later results replace earlier ones when they parse.
    /// A failing later phase recovers to the last good result.
    pub async fn run_research(
        &self,
        ticket_id: &str,
        stage: Stage,
        prompts: &[String],
        fallback: Value,
        recovery_defaults: Value,
    ) -> Result<PhaseOutcome> {
        let first_prompt = prompts
            .first()
            .ok_or_else(|| TriageError::Stage("research stage needs at least one phase".into()))?;

        let (mut result, response) = self
            .call_phase(ticket_id, stage, first_prompt, None, fallback.clone())
            .await?;

        let mut usage = response.usage;
        let mut steps = response.steps;
        let mut conversation_id = response.conversation_id;
        let mut raw_text = response.message;
        let mut recovered = false;

        for prompt in &prompts[1..] {
            match self
                .call_phase(
                    ticket_id,
                    stage,
                    prompt,
                    Some(conversation_id.as_str()),
                    fallback.clone(),
                )
                .await
            {
                Ok((refined, response)) => {
                    usage = merge_usage(&usage, &response.usage);
                    steps = merge_steps(steps, response.steps);
                    conversation_id = response.conversation_id;
                    raw_text = response.message;
                    if !refined.degraded || result.degraded {
                        result = refined;
                    }
                }
                Err(e) => {
                    self.recorder
                        .record_recovery(ticket_id, stage, &e.to_string());
                    result.fill_defaults(&recovery_defaults);
                    recovered = true;
                    break;
                }
            }
        }

        Ok(PhaseOutcome {
            result,
            usage,
            steps,
            conversation_id,
            raw_text,
            recovered,
        })
    }

    /// One agent call: stream steps to the recorder, parse the final message
    async fn call_phase(
        &self,
        ticket_id: &str,
        stage: Stage,
        input: &str,
        conversation_id: Option<&str>,
        fallback: Value,
    ) -> Result<(StageResult, ConverseResponse)> {
        let recorder = self.recorder.clone();
        let ticket = ticket_id.to_string();
        let on_step = move |step: &AgentStep| recorder.record_step(&ticket, stage, step);

        let response = self
            .agent
            .converse_streaming(&self.agent_id, input, conversation_id, &on_step)
            .await?;

        let outcome = parse_structured(&response.message, fallback);
        if outcome.is_degraded() {
            self.recorder.record_degraded(ticket_id, stage);
        }

        Ok((outcome.into_stage_result(), response))
    }
}

/// Copy a phase outcome's fields onto a trace before finalizing it
pub fn apply_outcome(trace: &mut StageTrace, outcome: &PhaseOutcome) {
    let (reasoning, tool_calls) = collect_trace_fields(&outcome.steps);
    trace.reasoning = reasoning;
    trace.tool_calls = tool_calls;
    trace.calls = outcome.usage.calls;
    trace.input_tokens = outcome.usage.input_tokens;
    trace.output_tokens = outcome.usage.output_tokens;
    trace.model = outcome.usage.model.clone();
    trace.result = Some(outcome.result.value.clone());
    trace.confidence = outcome.result.confidence();
    trace.raw_text = Some(outcome.raw_text.clone());
    if outcome.recovered {
        trace.note = Some("recovered from phase 1 result".to_string());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::EventBus;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use triage_store::MemoryStore;

    /// Scripted agent: replies (or fails) in submission order
    pub(crate) struct ScriptedAgent {
        replies: Mutex<VecDeque<ScriptedReply>>,
    }

    pub(crate) enum ScriptedReply {
        Message(String),
        Failure(String),
    }

    impl ScriptedAgent {
        pub(crate) fn new(replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }

        pub(crate) fn message(text: impl Into<String>) -> ScriptedReply {
            ScriptedReply::Message(text.into())
        }

        pub(crate) fn failure(text: impl Into<String>) -> ScriptedReply {
            ScriptedReply::Failure(text.into())
        }
    }

    #[async_trait]
    impl AgentClient for ScriptedAgent {
        async fn converse(
            &self,
            _agent_id: &str,
            _input: &str,
            conversation_id: Option<&str>,
        ) -> Result<ConverseResponse> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted agent ran out of replies");

            match reply {
                ScriptedReply::Message(message) => Ok(ConverseResponse {
                    conversation_id: conversation_id.unwrap_or("c-1").to_string(),
                    message,
                    steps: vec![AgentStep::Reasoning {
                        text: "thinking".to_string(),
                    }],
                    usage: AgentUsage {
                        calls: 1,
                        input_tokens: 100,
                        output_tokens: 50,
                        model: Some("reasoner-lg".to_string()),
                    },
                }),
                ScriptedReply::Failure(error) => Err(TriageError::Agent(error)),
            }
        }
    }

    pub(crate) fn runner(agent: ScriptedAgent) -> (PhaseRunner, Arc<EventBus>) {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let recorder = Arc::new(TraceRecorder::new(store, bus.clone()));
        (
            PhaseRunner::new(Arc::new(agent), recorder, "support-resolver"),
            bus,
        )
    }

    #[tokio::test]
    async fn test_single_phase_parses_result() {
        let (runner, _) = runner(ScriptedAgent::new(vec![ScriptedAgent::message(
            r#"{"category": "refund", "confidence": 0.9}"#,
        )]));

        let outcome = runner
            .run_single("t-1", Stage::Classify, "classify this", json!({}))
            .await
            .unwrap();

        assert!(!outcome.result.degraded);
        assert!(!outcome.recovered);
        assert_eq!(outcome.result.str_field("category"), Some("refund"));
        assert_eq!(outcome.usage.calls, 1);
    }

    #[tokio::test]
    async fn test_two_phase_merges_usage_and_steps() {
        let (runner, _) = runner(ScriptedAgent::new(vec![
            ScriptedAgent::message(r#"{"action": "refund", "confidence": 0.6}"#),
            ScriptedAgent::message(r#"{"action": "refund", "confidence": 0.85}"#),
        ]));

        let outcome = runner
            .run_refined(
                "t-1",
                Stage::Decide,
                "decide",
                |draft| format!("validate: {}", draft),
                json!({}),
                json!({}),
            )
            .await
            .unwrap();

        assert!(!outcome.recovered);
        assert_eq!(outcome.result.f64_field("confidence"), Some(0.85));
        assert_eq!(outcome.usage.calls, 2);
        assert_eq!(outcome.usage.input_tokens, 200);
        assert_eq!(outcome.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_phase_one_failure_fails_stage() {
        let (runner, _) = runner(ScriptedAgent::new(vec![ScriptedAgent::failure(
            "connection refused",
        )]));

        let result = runner
            .run_refined(
                "t-1",
                Stage::Decide,
                "decide",
                |_| "validate".to_string(),
                json!({}),
                json!({}),
            )
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_phase_two_failure_recovers_with_defaults() {
        let (runner, bus) = runner(ScriptedAgent::new(vec![
            ScriptedAgent::message(r#"{"action": "refund", "confidence": 0.6}"#),
            ScriptedAgent::failure("timeout"),
        ]));
        let mut rx = bus.subscribe("t-1");
        rx.recv().await.unwrap();

        let outcome = runner
            .run_refined(
                "t-1",
                Stage::Decide,
                "decide",
                |_| "validate".to_string(),
                json!({}),
                json!({"should_automate": false}),
            )
            .await
            .unwrap();

        assert!(outcome.recovered);
        assert_eq!(outcome.result.str_field("action"), Some("refund"));
        assert_eq!(outcome.result.bool_field("should_automate"), Some(false));
        // Only phase 1's usage counted, the second call never completed
        assert_eq!(outcome.usage.calls, 1);

        // An explicit recovery event was published
        let mut saw_recovery = false;
        while let Ok(event) = rx.try_recv() {
            if event.message.contains("recovered with phase 1") {
                saw_recovery = true;
            }
        }
        assert!(saw_recovery);
    }

    #[tokio::test]
    async fn test_recovery_is_deterministic() {
        for _ in 0..2 {
            let (runner, _) = runner(ScriptedAgent::new(vec![
                ScriptedAgent::message(r#"{"action": "replace", "confidence": 0.7}"#),
                ScriptedAgent::failure("timeout"),
            ]));

            let outcome = runner
                .run_refined(
                    "t-1",
                    Stage::Decide,
                    "decide",
                    |_| "validate".to_string(),
                    json!({}),
                    json!({"params": {}}),
                )
                .await
                .unwrap();

            assert_eq!(
                outcome.result.value,
                json!({"action": "replace", "confidence": 0.7, "params": {}})
            );
        }
    }

    #[tokio::test]
    async fn test_phase_two_unparseable_recovers_to_phase_one() {
        let (runner, _) = runner(ScriptedAgent::new(vec![
            ScriptedAgent::message(r#"{"action": "refund", "confidence": 0.6}"#),
            ScriptedAgent::message("I cannot produce structured output right now."),
        ]));

        let outcome = runner
            .run_refined(
                "t-1",
                Stage::Decide,
                "decide",
                |_| "validate".to_string(),
                json!({"action": "escalate"}),
                json!({}),
            )
            .await
            .unwrap();

        assert!(outcome.recovered);
        assert_eq!(outcome.result.str_field("action"), Some("refund"));
        // Both calls happened, both count toward the merged usage
        assert_eq!(outcome.usage.calls, 2);
    }

    #[tokio::test]
    async fn test_research_runs_requested_phase_count() {
        let (runner, _) = runner(ScriptedAgent::new(vec![
            ScriptedAgent::message(r#"{"summary": "initial", "confidence": 0.5}"#),
            ScriptedAgent::message(r#"{"summary": "deeper", "confidence": 0.7}"#),
            ScriptedAgent::message(r#"{"summary": "deepest", "confidence": 0.9}"#),
        ]));

        let prompts = vec![
            "research".to_string(),
            "go deeper".to_string(),
            "cross-check".to_string(),
        ];
        let outcome = runner
            .run_research("t-1", Stage::GatherContext, &prompts, json!({}), json!({}))
            .await
            .unwrap();

        assert_eq!(outcome.usage.calls, 3);
        assert_eq!(outcome.result.str_field("summary"), Some("deepest"));
    }

    #[tokio::test]
    async fn test_research_later_phase_failure_recovers() {
        let (runner, _) = runner(ScriptedAgent::new(vec![
            ScriptedAgent::message(r#"{"summary": "initial", "confidence": 0.6}"#),
            ScriptedAgent::failure("timeout"),
        ]));

        let prompts = vec!["research".to_string(), "go deeper".to_string()];
        let outcome = runner
            .run_research("t-1", Stage::GatherContext, &prompts, json!({}), json!({}))
            .await
            .unwrap();

        assert!(outcome.recovered);
        assert_eq!(outcome.result.str_field("summary"), Some("initial"));
    }

    #[test]
    fn test_apply_outcome_fills_trace() {
        let outcome = PhaseOutcome {
            result: StageResult::parsed(json!({"action": "refund", "confidence": 0.8})),
            usage: AgentUsage {
                calls: 2,
                input_tokens: 300,
                output_tokens: 120,
                model: Some("reasoner-lg".to_string()),
            },
            steps: vec![AgentStep::Reasoning {
                text: "checked policy".to_string(),
            }],
            conversation_id: "c-9".to_string(),
            raw_text: "raw".to_string(),
            recovered: true,
        };

        let mut trace = StageTrace::running("t-1", Stage::Decide);
        apply_outcome(&mut trace, &outcome);

        assert_eq!(trace.calls, 2);
        assert_eq!(trace.confidence, Some(0.8));
        assert_eq!(trace.reasoning, vec!["checked policy"]);
        assert_eq!(trace.note.as_deref(), Some("recovered from phase 1 result"));
    }
}
