//! The ticket resolution pipeline
//!
//! Seven stages run strictly in order, at most one active per ticket:
//! classify, gather-context, decide, negotiate, project, execute,
//! assess-quality. Escalation short-circuits: once a gate decides a human
//! must take over, every remaining stage is skipped with a recorded reason
//! and the ticket closes as escalated.

use crate::debate::DebateEngine;
use crate::events::EventBus;
use crate::knowledge::{KnowledgeWriter, KNOWLEDGE_COLLECTION};
use crate::phase::{apply_outcome, PhaseOutcome, PhaseRunner};
use crate::prompt;
use crate::recorder::{TraceRecorder, TRACES_COLLECTION};
use crate::router::{should_skip_projection, Complexity};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use triage_agent::AgentClient;
use triage_core::{
    ActionParams, DebateContext, DebateProposal, DebateTranscript, EventKind, PipelineConfig,
    PipelineEvent, Result, Sentiment, Stage, StageTrace, Ticket, TicketRequest, TicketStatus,
    TokenBudget, TriageError,
};
use triage_store::{DocumentStore, StoreQuery};

pub const TICKETS_COLLECTION: &str = "tickets";
pub const CUSTOMERS_COLLECTION: &str = "customers";
pub const CATALOG_COLLECTION: &str = "catalog";

/// Aggregated view of a ticket's run, assembled from the durable traces
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceReport {
    pub ticket: Ticket,
    pub stages: Vec<StageTrace>,
    pub overall_status: TicketStatus,
    pub total_duration_ms: u64,
    pub total_tokens: u64,
}

/// The decision carried from the decide stage into the back half of the run
struct Decision {
    action: String,
    reasoning: String,
    params: ActionParams,
    confidence: Option<f64>,
}

/// Drives tickets through the pipeline and serves status/trace queries
#[derive(Clone)]
pub struct PipelineEngine {
    store: Arc<dyn DocumentStore>,
    bus: Arc<EventBus>,
    recorder: Arc<TraceRecorder>,
    runner: Arc<PhaseRunner>,
    debate: Arc<DebateEngine>,
    knowledge: Arc<KnowledgeWriter>,
    config: PipelineConfig,
}

impl PipelineEngine {
    pub fn new(
        agent: Arc<dyn AgentClient>,
        store: Arc<dyn DocumentStore>,
        config: PipelineConfig,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let recorder = Arc::new(TraceRecorder::new(store.clone(), bus.clone()));
        let runner = Arc::new(PhaseRunner::new(
            agent.clone(),
            recorder.clone(),
            config.agent.agent_id.clone(),
        ));
        let debate = Arc::new(DebateEngine::new(
            agent,
            recorder.clone(),
            config.agent.agent_id.clone(),
            config.debate.clone(),
        ));
        let knowledge = Arc::new(KnowledgeWriter::new(
            store.clone(),
            config.knowledge_quality_threshold,
            config.knowledge_dedup_hours,
        ));

        Self {
            store,
            bus,
            recorder,
            runner,
            debate,
            knowledge,
            config,
        }
    }

    /// Accept a ticket and start its run in the background, returning the id
    pub async fn submit(&self, request: TicketRequest) -> Result<String> {
        let ticket = Ticket::from_request(request);
        let id = ticket.id.clone();
        self.start(ticket).await?;
        Ok(id)
    }

    /// Persist a pre-built ticket and start its run in the background
    ///
    /// Lets callers subscribe to the ticket's events before any are published.
    pub async fn start(&self, ticket: Ticket) -> Result<()> {
        self.save_ticket(&ticket).await?;
        info!(ticket_id = %ticket.id, subject = %ticket.subject, "Ticket submitted");

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_pipeline(ticket).await {
                error!(error = %e, "Pipeline run failed");
            }
        });
        Ok(())
    }

    /// Run a ticket through the pipeline inline and return its final state
    ///
    /// Hard failures still land the ticket in a terminal escalated state, so
    /// the returned ticket reflects whatever the run managed to do.
    pub async fn process(&self, request: TicketRequest) -> Result<Ticket> {
        let ticket = Ticket::from_request(request);
        let id = ticket.id.clone();
        self.save_ticket(&ticket).await?;

        if let Err(e) = self.run_pipeline(ticket).await {
            warn!(ticket_id = %id, error = %e, "Run ended in error");
        }
        self.load_ticket(&id).await
    }

    /// Current ticket state, `None` when the id is unknown
    pub async fn status(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        match self.load_ticket(ticket_id).await {
            Ok(ticket) => Ok(Some(ticket)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Full trace report assembled from the durable stage traces
    pub async fn trace(&self, ticket_id: &str) -> Result<TraceReport> {
        let ticket = self.load_ticket(ticket_id).await?;

        let docs = self
            .store
            .search(
                TRACES_COLLECTION,
                StoreQuery::default().with_filter(json!({"ticket_id": ticket_id})),
            )
            .await?;

        let mut stages: Vec<StageTrace> = docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value(doc).ok())
            .collect();
        stages.sort_by_key(|trace| trace.ordinal);

        let total_duration_ms = stages.iter().filter_map(|t| t.duration_ms).sum();
        let total_tokens = stages
            .iter()
            .map(|t| t.input_tokens + t.output_tokens)
            .sum();

        let overall_status = ticket.status;
        Ok(TraceReport {
            ticket,
            stages,
            overall_status,
            total_duration_ms,
            total_tokens,
        })
    }

    /// Live event stream for a ticket
    pub fn subscribe(&self, ticket_id: &str) -> mpsc::UnboundedReceiver<PipelineEvent> {
        self.bus.subscribe(ticket_id)
    }

    async fn run_pipeline(&self, ticket: Ticket) -> Result<()> {
        let ticket_id = ticket.id.clone();
        match self.execute_stages(ticket).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort(&ticket_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// The stage state machine
    async fn execute_stages(&self, mut ticket: Ticket) -> Result<()> {
        let id = ticket.id.clone();
        let mut budget = TokenBudget::default();

        ticket.status = TicketStatus::Processing;
        self.save_ticket(&ticket).await?;

        // 1. classify
        let trace = self.recorder.begin_stage(&id, Stage::Classify).await?;
        let fallback = json!({
            "category": ticket.category,
            "complexity": "moderate",
            "sentiment": "neutral",
            "confidence": 0.5,
        });
        let classify = match self
            .runner
            .run_single(
                &id,
                Stage::Classify,
                &prompt::classify_prompt(&ticket),
                fallback,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(trace, e).await,
        };
        self.finish(trace, &classify, &mut budget).await?;

        if let Some(category) = classify.result.str_field("category") {
            ticket.category = category.to_string();
            self.save_ticket(&ticket).await?;
        }
        let complexity = Complexity::from_label(classify.result.str_field("complexity"));
        let sentiment: Sentiment = classify
            .result
            .str_field("sentiment")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        // 2. gather-context: store lookups feed the research conversation
        let trace = self.recorder.begin_stage(&id, Stage::GatherContext).await?;
        let (customer, context) = match self.lookup_context(&ticket).await {
            Ok(pair) => pair,
            Err(e) => return self.fail(trace, e).await,
        };
        let vip = customer
            .get("vip")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut prompts = vec![prompt::research_prompt(&ticket, &context)];
        for round in 2..=complexity.research_phases() {
            prompts.push(prompt::research_refine_prompt(round));
        }
        let research = match self
            .runner
            .run_research(
                &id,
                Stage::GatherContext,
                &prompts,
                json!({"summary": "", "confidence": 0.0}),
                json!({"confidence": 0.0}),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(trace, e).await,
        };
        self.finish(trace, &research, &mut budget).await?;

        let research_confidence = research.result.confidence().unwrap_or(0.0);
        if research_confidence < self.config.escalation_confidence {
            return self
                .escalate(
                    &mut ticket,
                    Stage::GatherContext,
                    &format!("low research confidence ({:.2})", research_confidence),
                    Some(research_confidence),
                )
                .await;
        }

        // 3. decide
        let trace = self.recorder.begin_stage(&id, Stage::Decide).await?;
        let decide = match self
            .runner
            .run_refined(
                &id,
                Stage::Decide,
                &prompt::decide_prompt(&ticket, &research.result.value),
                prompt::decide_validate_prompt,
                json!({"action": "escalate", "should_automate": false, "confidence": 0.0}),
                json!({"should_automate": false}),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(trace, e).await,
        };
        self.finish(trace, &decide, &mut budget).await?;

        let mut decision = Decision {
            action: decide
                .result
                .str_field("action")
                .unwrap_or("escalate")
                .to_string(),
            reasoning: decide
                .result
                .str_field("reasoning")
                .unwrap_or("")
                .to_string(),
            params: decide
                .result
                .value
                .get("params")
                .map(ActionParams::from_value)
                .unwrap_or_default(),
            confidence: decide.result.confidence(),
        };
        let should_automate = decide.result.bool_field("should_automate").unwrap_or(false);
        self.recorder.emit(
            PipelineEvent::new(
                &id,
                EventKind::Decision,
                format!("decision: {} (automate: {})", decision.action, should_automate),
            )
            .with_stage(Stage::Decide)
            .with_detail(json!({
                "action": decision.action,
                "should_automate": should_automate,
                "params": decision.params,
            })),
        );

        if !should_automate || decision.action == "escalate" {
            return self
                .escalate(
                    &mut ticket,
                    Stage::Decide,
                    "decision requires manual handling",
                    decision.confidence,
                )
                .await;
        }

        // 4. negotiate: a failed debate keeps the original decision
        let trace = self.recorder.begin_stage(&id, Stage::Negotiate).await?;
        let proposal = DebateProposal {
            action: decision.action.clone(),
            reasoning: decision.reasoning.clone(),
            params: decision.params.clone(),
        };
        let ctx = DebateContext { vip, sentiment };
        match self.debate.run(&id, proposal, ctx).await {
            Ok(transcript) => {
                let mut trace = trace;
                trace.result = Some(serde_json::to_value(&transcript)?);
                self.recorder.complete_stage(trace).await?;

                decision.action = transcript.final_action.clone();
                decision.params = transcript.final_params.clone();
                self.update_decide_trace(&id, &transcript).await?;
            }
            Err(e) => {
                warn!(ticket_id = %id, error = %e, "Negotiation failed, keeping original decision");
                self.recorder.fail_stage(trace, &e.to_string()).await?;
            }
        }

        let decision_value = json!({
            "action": decision.action,
            "reasoning": decision.reasoning,
            "params": decision.params,
            "confidence": decision.confidence,
        });

        // 5. project, unless the router says the ticket is too simple to bother
        let mut blocked = false;
        if should_skip_projection(complexity, decision.confidence, &self.config) {
            self.recorder
                .skip_stage(&id, Stage::Project, "simple ticket with confident decision")
                .await?;
        } else {
            let trace = self.recorder.begin_stage(&id, Stage::Project).await?;
            let projection = match self
                .runner
                .run_refined(
                    &id,
                    Stage::Project,
                    &prompt::project_prompt(&ticket, &decision_value),
                    prompt::project_validate_prompt,
                    json!({"expected_outcome": "unknown", "risks": [], "confidence": 0.5}),
                    json!({"blocked": false}),
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => return self.fail(trace, e).await,
            };
            blocked = projection.result.bool_field("blocked").unwrap_or(false);
            self.finish(trace, &projection, &mut budget).await?;
        }
        if blocked {
            return self
                .escalate(
                    &mut ticket,
                    Stage::Project,
                    "projection flagged a blocking risk",
                    decision.confidence,
                )
                .await;
        }

        // 6. execute
        let trace = self.recorder.begin_stage(&id, Stage::Execute).await?;
        let execution = match self
            .runner
            .run_single(
                &id,
                Stage::Execute,
                &prompt::execute_prompt(&ticket, &decision_value),
                json!({"executed": false, "actions_taken": [], "confidence": 0.0}),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(trace, e).await,
        };
        self.finish(trace, &execution, &mut budget).await?;

        // 7. assess-quality
        let trace = self.recorder.begin_stage(&id, Stage::AssessQuality).await?;
        let assessment = match self
            .runner
            .run_single(
                &id,
                Stage::AssessQuality,
                &prompt::quality_prompt(&ticket, &execution.result.value),
                json!({
                    "passed": false,
                    "quality_score": 0.0,
                    "resolution_summary": "quality assessment unavailable",
                }),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(trace, e).await,
        };
        self.finish(trace, &assessment, &mut budget).await?;

        let passed = assessment.result.bool_field("passed").unwrap_or(false);
        let quality = assessment.result.f64_field("quality_score").unwrap_or(0.0);
        let resolution = assessment
            .result
            .str_field("resolution_summary")
            .or_else(|| execution.result.str_field("customer_message"))
            .unwrap_or(decision.action.as_str())
            .to_string();

        ticket.automated = true;
        let status = if passed {
            TicketStatus::Resolved
        } else {
            TicketStatus::Escalated
        };
        ticket.close(status, resolution.clone(), Some(quality));
        self.save_ticket(&ticket).await?;

        if passed {
            self.knowledge
                .maybe_record(&ticket, &decision.action, quality, &resolution)
                .await?;
        }

        self.recorder.emit(
            PipelineEvent::new(
                &id,
                EventKind::Status,
                format!(
                    "pipeline finished: {}",
                    if passed { "resolved" } else { "escalated" }
                ),
            )
            .with_detail(json!({"total_tokens": budget.total()})),
        );
        info!(
            ticket_id = %id,
            resolved = passed,
            total_tokens = budget.total(),
            "Pipeline finished"
        );
        Ok(())
    }

    /// Concurrent store lookups that seed the research conversation
    async fn lookup_context(&self, ticket: &Ticket) -> Result<(Value, Value)> {
        let (customer, similar, catalog, knowledge) = tokio::join!(
            self.store.get(CUSTOMERS_COLLECTION, &ticket.customer_id),
            self.store.search(
                TICKETS_COLLECTION,
                StoreQuery::default()
                    .with_filter(json!({"category": ticket.category, "status": "resolved"}))
                    .sorted_desc("created_at")
                    .with_limit(5),
            ),
            self.store.search(
                CATALOG_COLLECTION,
                StoreQuery::default()
                    .with_filter(json!({"category": ticket.category}))
                    .with_limit(5),
            ),
            self.store.search(
                KNOWLEDGE_COLLECTION,
                StoreQuery::default()
                    .with_filter(json!({"category": ticket.category}))
                    .sorted_desc("recorded_at")
                    .with_limit(5),
            ),
        );

        // An unknown customer is a normal condition, not a failure
        let customer = match customer {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => Value::Null,
            Err(e) => return Err(e),
        };

        let context = json!({
            "customer": customer.clone(),
            "similar_tickets": similar?,
            "catalog": catalog?,
            "knowledge": knowledge?,
        });
        Ok((customer, context))
    }

    /// Complete a trace from an outcome and account its tokens
    async fn finish(
        &self,
        mut trace: StageTrace,
        outcome: &PhaseOutcome,
        budget: &mut TokenBudget,
    ) -> Result<()> {
        apply_outcome(&mut trace, outcome);
        budget.record(
            trace.stage,
            outcome.usage.input_tokens,
            outcome.usage.output_tokens,
        );

        let stage = trace.stage;
        let ticket_id = trace.ticket_id.clone();
        self.recorder.complete_stage(trace).await?;

        if let Some(confidence) = outcome.result.confidence() {
            self.recorder.emit_confidence(&ticket_id, stage, confidence);
        }
        Ok(())
    }

    /// Mark the trace failed, then surface the original error
    async fn fail(&self, trace: StageTrace, error: TriageError) -> Result<()> {
        self.recorder.fail_stage(trace, &error.to_string()).await?;
        Err(error)
    }

    /// Skip every stage after `after` and close the ticket as escalated
    async fn escalate(
        &self,
        ticket: &mut Ticket,
        after: Stage,
        reason: &str,
        confidence: Option<f64>,
    ) -> Result<()> {
        for stage in after.remaining() {
            self.recorder.skip_stage(&ticket.id, *stage, reason).await?;
        }

        ticket.close(
            TicketStatus::Escalated,
            format!("escalated: {}", reason),
            confidence,
        );
        self.save_ticket(ticket).await?;

        self.recorder.emit(PipelineEvent::new(
            &ticket.id,
            EventKind::Status,
            format!("ticket escalated: {}", reason),
        ));
        info!(ticket_id = %ticket.id, reason, "Ticket escalated");
        Ok(())
    }

    /// Fold the negotiated outcome back into the decide trace's result
    async fn update_decide_trace(
        &self,
        ticket_id: &str,
        transcript: &DebateTranscript,
    ) -> Result<()> {
        let key = StageTrace::doc_key(ticket_id, Stage::Decide);
        let mut doc = self.store.get(TRACES_COLLECTION, &key).await?;

        if let Some(result) = doc.get_mut("result").and_then(Value::as_object_mut) {
            result.insert("action".to_string(), json!(transcript.final_action));
            result.insert(
                "params".to_string(),
                serde_json::to_value(&transcript.final_params)?,
            );
            result.insert("negotiated".to_string(), json!(true));
        }

        self.store.upsert(TRACES_COLLECTION, &key, doc).await
    }

    /// Fail any trace still marked running and close the ticket
    async fn abort(&self, ticket_id: &str, error: &str) -> Result<()> {
        let running = self
            .store
            .search(
                TRACES_COLLECTION,
                StoreQuery::default()
                    .with_filter(json!({"ticket_id": ticket_id, "status": "running"})),
            )
            .await?;
        for doc in running {
            if let Ok(trace) = serde_json::from_value::<StageTrace>(doc) {
                self.recorder.fail_stage(trace, error).await?;
            }
        }

        let mut ticket = self.load_ticket(ticket_id).await?;
        if !ticket.status.is_terminal() {
            ticket.close(
                TicketStatus::Escalated,
                format!("pipeline error: {}", error),
                None,
            );
            self.save_ticket(&ticket).await?;
        }

        self.recorder.emit(PipelineEvent::new(
            ticket_id,
            EventKind::Status,
            format!("pipeline aborted: {}", error),
        ));
        Ok(())
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<()> {
        let doc = serde_json::to_value(ticket)?;
        self.store.upsert(TICKETS_COLLECTION, &ticket.id, doc).await
    }

    async fn load_ticket(&self, ticket_id: &str) -> Result<Ticket> {
        let doc = self.store.get(TICKETS_COLLECTION, ticket_id).await?;
        Ok(serde_json::from_value(doc)?)
    }
}
