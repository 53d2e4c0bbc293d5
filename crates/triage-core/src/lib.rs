//! Core types for the triage ticket resolution pipeline
//!
//! This crate holds the shared vocabulary of the workspace: tickets, stage
//! traces, pipeline events, debate transcripts, the unified error type and
//! the pipeline configuration. It has no I/O beyond config file loading.

pub mod config;
pub mod error;
pub mod types;

pub use config::{AgentEndpointConfig, DebateWeights, PipelineConfig};
pub use error::{Result, TriageError};
pub use types::{
    ActionParams, DebateContext, DebateProposal, DebateRole, DebateTranscript, DebateTurn,
    DebateWinner, EventKind, PipelineEvent, Priority, Sentiment, Stage, StageResult, StageStatus,
    StageTrace, Ticket, TicketRequest, TicketStatus, TokenBudget, ToolCallRecord,
};
