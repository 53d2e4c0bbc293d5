//! Two-role adversarial negotiation over a proposed resolution
//!
//! A generous advocate and a conservative advocate each argue the decide
//! stage's proposal across two rounds, then a deterministic scoring rule
//! settles the verdict. The agent provides the arguments; the verdict is
//! computed locally so the same turns always produce the same outcome.

use crate::prompt;
use crate::recorder::TraceRecorder;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use triage_agent::{parse_structured, AgentClient, AgentStep};
use triage_core::{
    ActionParams, DebateContext, DebateProposal, DebateRole, DebateTranscript, DebateTurn,
    DebateWeights, DebateWinner, EventKind, PipelineEvent, Result, Stage,
};

/// Deterministic score for one side's final position
///
/// Boosts apply to the generous role only: the conservative position is the
/// policy baseline and never gets situational leverage.
pub fn score(confidence: f64, role: DebateRole, ctx: &DebateContext, weights: &DebateWeights) -> f64 {
    if role == DebateRole::Conservative {
        return confidence;
    }

    let mut scored = confidence;
    if ctx.vip {
        scored *= weights.vip_boost;
    }
    if ctx.sentiment.is_negative() {
        scored *= weights.sentiment_boost;
    }
    scored
}

/// Outcome of resolving the two final positions
#[derive(Debug, Clone)]
pub struct Verdict {
    pub winner: DebateWinner,
    pub consensus: bool,
    pub action: String,
    pub params: ActionParams,
    pub rationale: String,
}

/// Resolve the two round-2 positions into a verdict
///
/// Three cases, checked in order: identical positions are consensus and
/// adopted verbatim; same action with differing params takes the scoring
/// winner's action and merges params with winner precedence; different
/// actions go winner-takes-all. Score ties fall to the conservative side.
pub fn resolve(
    generous: &DebateTurn,
    conservative: &DebateTurn,
    ctx: &DebateContext,
    weights: &DebateWeights,
) -> Verdict {
    if generous.action == conservative.action && generous.params == conservative.params {
        return Verdict {
            winner: DebateWinner::Consensus,
            consensus: true,
            action: generous.action.clone(),
            params: generous.params.clone(),
            rationale: format!(
                "both advocates converged on {}: {}",
                generous.action, conservative.argument
            ),
        };
    }

    let generous_score = score(generous.confidence, DebateRole::Generous, ctx, weights);
    let conservative_score = score(
        conservative.confidence,
        DebateRole::Conservative,
        ctx,
        weights,
    );
    debug!(generous_score, conservative_score, "debate scored");

    let (winner_turn, loser_turn, winner) = if generous_score > conservative_score {
        (generous, conservative, DebateWinner::Generous)
    } else {
        (conservative, generous, DebateWinner::Conservative)
    };

    if generous.action == conservative.action {
        Verdict {
            winner,
            consensus: false,
            action: winner_turn.action.clone(),
            params: ActionParams::merged(&winner_turn.params, &loser_turn.params),
            rationale: format!(
                "same action, {} position prevailed on parameters ({:.3} vs {:.3}): {}",
                winner_turn.role, winner_score(winner, generous_score, conservative_score),
                loser_score(winner, generous_score, conservative_score), winner_turn.argument
            ),
        }
    } else {
        Verdict {
            winner,
            consensus: false,
            action: winner_turn.action.clone(),
            params: winner_turn.params.clone(),
            rationale: format!(
                "{} position prevailed outright ({:.3} vs {:.3}): {}",
                winner_turn.role,
                winner_score(winner, generous_score, conservative_score),
                loser_score(winner, generous_score, conservative_score),
                winner_turn.argument
            ),
        }
    }
}

fn winner_score(winner: DebateWinner, generous: f64, conservative: f64) -> f64 {
    match winner {
        DebateWinner::Generous => generous,
        _ => conservative,
    }
}

fn loser_score(winner: DebateWinner, generous: f64, conservative: f64) -> f64 {
    match winner {
        DebateWinner::Generous => conservative,
        _ => generous,
    }
}

/// Human-auditable list of what the debate changed versus the initial proposal
pub fn diff_changes(
    initial: &DebateProposal,
    final_action: &str,
    final_params: &ActionParams,
) -> Vec<String> {
    let mut changes = Vec::new();

    if initial.action != final_action {
        changes.push(format!(
            "action changed from {} to {}",
            initial.action, final_action
        ));
    }
    if initial.params.amount != final_params.amount {
        changes.push(format!(
            "amount changed from {:?} to {:?}",
            initial.params.amount, final_params.amount
        ));
    }
    if initial.params.percentage != final_params.percentage {
        changes.push(format!(
            "percentage changed from {:?} to {:?}",
            initial.params.percentage, final_params.percentage
        ));
    }
    if initial.params.gesture != final_params.gesture {
        match &final_params.gesture {
            Some(gesture) => changes.push(format!("gesture added: {}", gesture)),
            None => changes.push("gesture removed".to_string()),
        }
    }
    if initial.params.expedite != final_params.expedite {
        changes.push(format!(
            "expedite changed from {:?} to {:?}",
            initial.params.expedite, final_params.expedite
        ));
    }

    changes
}

/// Runs the two-round negotiation against the agent
pub struct DebateEngine {
    agent: Arc<dyn AgentClient>,
    recorder: Arc<TraceRecorder>,
    agent_id: String,
    weights: DebateWeights,
}

impl DebateEngine {
    pub fn new(
        agent: Arc<dyn AgentClient>,
        recorder: Arc<TraceRecorder>,
        agent_id: impl Into<String>,
        weights: DebateWeights,
    ) -> Self {
        Self {
            agent,
            recorder,
            agent_id: agent_id.into(),
            weights,
        }
    }

    /// Run both rounds and settle the verdict
    ///
    /// Each role keeps its own conversation. Round 2 hands each side only the
    /// opponent's stated position, never the opponent's full transcript.
    pub async fn run(
        &self,
        ticket_id: &str,
        initial: DebateProposal,
        ctx: DebateContext,
    ) -> Result<DebateTranscript> {
        self.announce(ticket_id, "negotiation opened: two advocates argue the proposal");

        let generous_opening_prompt = prompt::debate_opening_prompt(DebateRole::Generous, &initial);
        let conservative_opening_prompt =
            prompt::debate_opening_prompt(DebateRole::Conservative, &initial);
        let (generous_open, conservative_open) = tokio::join!(
            self.take_turn(
                ticket_id,
                DebateRole::Generous,
                1,
                &generous_opening_prompt,
                None,
                &initial,
            ),
            self.take_turn(
                ticket_id,
                DebateRole::Conservative,
                1,
                &conservative_opening_prompt,
                None,
                &initial,
            ),
        );
        let (generous_open, generous_conv) = generous_open?;
        let (conservative_open, conservative_conv) = conservative_open?;

        self.announce_turn(ticket_id, &generous_open);
        self.announce_turn(ticket_id, &conservative_open);

        let generous_rebuttal_prompt = prompt::debate_rebuttal_prompt(&conservative_open);
        let conservative_rebuttal_prompt = prompt::debate_rebuttal_prompt(&generous_open);
        let (generous_final, conservative_final) = tokio::join!(
            self.take_turn(
                ticket_id,
                DebateRole::Generous,
                2,
                &generous_rebuttal_prompt,
                Some(generous_conv.as_str()),
                &initial,
            ),
            self.take_turn(
                ticket_id,
                DebateRole::Conservative,
                2,
                &conservative_rebuttal_prompt,
                Some(conservative_conv.as_str()),
                &initial,
            ),
        );
        let (generous_final, _) = generous_final?;
        let (conservative_final, _) = conservative_final?;

        self.announce_turn(ticket_id, &generous_final);
        self.announce_turn(ticket_id, &conservative_final);

        let verdict = resolve(&generous_final, &conservative_final, &ctx, &self.weights);
        let changes = diff_changes(&initial, &verdict.action, &verdict.params);

        self.recorder.emit(
            PipelineEvent::new(
                ticket_id,
                EventKind::Debate,
                format!("verdict: {} ({})", verdict.action, verdict.rationale),
            )
            .with_stage(Stage::Negotiate)
            .with_detail(json!({
                "winner": verdict.winner,
                "consensus": verdict.consensus,
                "changes": changes,
            })),
        );

        Ok(DebateTranscript {
            initial,
            turns: vec![
                generous_open,
                conservative_open,
                generous_final,
                conservative_final,
            ],
            consensus: verdict.consensus,
            winner: verdict.winner,
            final_action: verdict.action,
            final_params: verdict.params,
            rationale: verdict.rationale,
            changes,
        })
    }

    /// One turn: call the agent, parse the position, fall back to echoing
    /// the initial proposal at low confidence when parsing fails
    async fn take_turn(
        &self,
        ticket_id: &str,
        role: DebateRole,
        round: u8,
        input: &str,
        conversation_id: Option<&str>,
        initial: &DebateProposal,
    ) -> Result<(DebateTurn, String)> {
        let recorder = self.recorder.clone();
        let ticket = ticket_id.to_string();
        let on_step =
            move |step: &AgentStep| recorder.record_step(&ticket, Stage::Negotiate, step);

        let response = self
            .agent
            .converse_streaming(&self.agent_id, input, conversation_id, &on_step)
            .await?;

        let fallback = json!({
            "argument": format!("{} advocate defaults to the initial proposal", role),
            "action": initial.action,
            "params": initial.params,
            "confidence": 0.5,
            "key_points": [],
        });
        let outcome = parse_structured(&response.message, fallback);
        if outcome.is_degraded() {
            self.recorder.record_degraded(ticket_id, Stage::Negotiate);
        }

        let value = outcome.into_stage_result().value;
        let turn = turn_from_value(role, round, &value);

        Ok((turn, response.conversation_id))
    }

    fn announce(&self, ticket_id: &str, message: &str) {
        self.recorder.emit(
            PipelineEvent::new(ticket_id, EventKind::Debate, message).with_stage(Stage::Negotiate),
        );
    }

    fn announce_turn(&self, ticket_id: &str, turn: &DebateTurn) {
        self.recorder.emit(
            PipelineEvent::new(
                ticket_id,
                EventKind::Debate,
                format!(
                    "round {} {}: {} (confidence {:.2})",
                    turn.round, turn.role, turn.action, turn.confidence
                ),
            )
            .with_stage(Stage::Negotiate),
        );
    }
}

fn turn_from_value(role: DebateRole, round: u8, value: &Value) -> DebateTurn {
    DebateTurn {
        role,
        round,
        argument: value
            .get("argument")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        action: value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("escalate")
            .to_string(),
        params: value
            .get("params")
            .map(ActionParams::from_value)
            .unwrap_or_default(),
        confidence: value
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5),
        key_points: value
            .get("key_points")
            .and_then(Value::as_array)
            .map(|points| {
                points
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}
