//! Prompt construction for each pipeline stage
//!
//! Every prompt asks for a fenced JSON object with a named schema so the
//! structured-output parser has something to latch onto. Keep these short;
//! the agent carries the conversation history between phases of a stage.

use serde_json::Value;
use triage_core::{DebateProposal, DebateRole, DebateTurn, Ticket};

pub fn classify_prompt(ticket: &Ticket) -> String {
    format!(
        "Classify this support ticket.\n\n\
         Subject: {}\n\
         Description: {}\n\
         Priority: {:?}\n\n\
         Reply with a fenced JSON object:\n\
         {{\"category\": string, \"complexity\": \"simple\"|\"moderate\"|\"complex\", \
         \"sentiment\": \"positive\"|\"neutral\"|\"negative\"|\"angry\", \
         \"confidence\": number}}",
        ticket.subject, ticket.description, ticket.priority
    )
}

pub fn research_prompt(ticket: &Ticket, context: &Value) -> String {
    format!(
        "Research this ticket before any decision is made.\n\n\
         Ticket category: {}\n\
         Subject: {}\n\
         Description: {}\n\n\
         Store lookups already performed:\n{}\n\n\
         Summarize what is known, what is missing, and how confident you are.\n\
         Reply with a fenced JSON object:\n\
         {{\"summary\": string, \"relevant_policies\": [string], \
         \"similar_resolutions\": [string], \"confidence\": number}}",
        ticket.category, ticket.subject, ticket.description, context
    )
}

pub fn research_refine_prompt(round: usize) -> String {
    format!(
        "Research pass {}: re-examine your findings. Resolve contradictions, \
         fill the gaps you named, and adjust your confidence.\n\
         Reply with the same fenced JSON schema as before.",
        round
    )
}

pub fn decide_prompt(ticket: &Ticket, research: &Value) -> String {
    format!(
        "Decide how to resolve this ticket.\n\n\
         Subject: {}\n\
         Research findings: {}\n\n\
         Reply with a fenced JSON object:\n\
         {{\"action\": string, \"reasoning\": string, \"should_automate\": bool, \
         \"params\": {{\"amount\"?: number, \"percentage\"?: number, \
         \"gesture\"?: string, \"expedite\"?: bool}}, \"confidence\": number}}\n\
         Use action \"escalate\" when a human must handle this.",
        ticket.subject, research
    )
}

pub fn decide_validate_prompt(draft: &Value) -> String {
    format!(
        "Validate your draft decision against policy: {}\n\
         Check the amount against limits, confirm the action matches the \
         category, and restate the decision.\n\
         Reply with the same fenced JSON schema, adjusting values where the \
         draft was wrong.",
        draft
    )
}

pub fn debate_opening_prompt(role: DebateRole, proposal: &DebateProposal) -> String {
    let stance = match role {
        DebateRole::Generous => {
            "You advocate for the customer: satisfaction and retention outweigh \
             marginal cost. Argue for the most customer-favorable defensible outcome."
        }
        DebateRole::Conservative => {
            "You advocate for the business: policy compliance and cost control. \
             Argue for the leanest outcome that still resolves the ticket."
        }
    };

    format!(
        "{}\n\nProposed resolution: action \"{}\", params {}.\n\
         Reasoning behind it: {}\n\n\
         State your position. Reply with a fenced JSON object:\n\
         {{\"argument\": string, \"action\": string, \
         \"params\": {{\"amount\"?: number, \"percentage\"?: number, \
         \"gesture\"?: string, \"expedite\"?: bool}}, \
         \"confidence\": number, \"key_points\": [string]}}",
        stance,
        proposal.action,
        serde_json::to_string(&proposal.params).unwrap_or_else(|_| "{}".to_string()),
        proposal.reasoning
    )
}

pub fn debate_rebuttal_prompt(opponent: &DebateTurn) -> String {
    format!(
        "Your opponent ({}) argued for action \"{}\" with params {} at \
         confidence {:.2}. Their key points: {}.\n\n\
         Respond: concede what is right, rebut what is wrong, and state your \
         final position. Reply with the same fenced JSON schema as your opening.",
        opponent.role,
        opponent.action,
        serde_json::to_string(&opponent.params).unwrap_or_else(|_| "{}".to_string()),
        opponent.confidence,
        opponent.key_points.join("; ")
    )
}

pub fn project_prompt(ticket: &Ticket, decision: &Value) -> String {
    format!(
        "Project the outcome of executing this resolution before it runs.\n\n\
         Ticket subject: {}\n\
         Decision: {}\n\n\
         Reply with a fenced JSON object:\n\
         {{\"expected_outcome\": string, \"risks\": [string], \
         \"customer_impact\": string, \"confidence\": number}}",
        ticket.subject, decision
    )
}

pub fn project_validate_prompt(draft: &Value) -> String {
    format!(
        "Stress-test your projection: {}\n\
         For each risk, state whether it blocks execution. Reply with the same \
         fenced JSON schema, plus \"blocked\": bool.",
        draft
    )
}

pub fn execute_prompt(ticket: &Ticket, decision: &Value) -> String {
    format!(
        "Execute this resolution using your tools.\n\n\
         Ticket id: {}\n\
         Customer id: {}\n\
         Decision: {}\n\n\
         Perform the actions, then reply with a fenced JSON object:\n\
         {{\"executed\": bool, \"actions_taken\": [string], \
         \"customer_message\": string, \"confidence\": number}}",
        ticket.id, ticket.customer_id, decision
    )
}

pub fn quality_prompt(ticket: &Ticket, execution: &Value) -> String {
    format!(
        "Assess the quality of this completed resolution.\n\n\
         Ticket subject: {}\n\
         Execution record: {}\n\n\
         Judge correctness, completeness, and tone. Reply with a fenced JSON \
         object:\n\
         {{\"passed\": bool, \"quality_score\": number, \
         \"resolution_summary\": string, \"notes\": [string]}}",
        ticket.subject, execution
    )
}
