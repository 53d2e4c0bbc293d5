//! Orchestration core for the triage ticket resolution pipeline
//!
//! The engineering-hard part lives here: the stage state machine, the
//! multi-phase runner with recovery, the adversarial debate/consensus engine,
//! and the trace/event model that lets an observer watch a run in real time.
//! The remote reasoning service and the document store are collaborators
//! reached through the traits in `triage-agent` and `triage-store`.

pub mod debate;
pub mod engine;
pub mod events;
pub mod knowledge;
pub mod phase;
pub mod prompt;
pub mod recorder;
pub mod router;

pub use debate::{score, DebateEngine, Verdict};
pub use engine::{PipelineEngine, TraceReport};
pub use events::EventBus;
pub use knowledge::KnowledgeWriter;
pub use phase::{PhaseOutcome, PhaseRunner};
pub use recorder::TraceRecorder;
pub use router::Complexity;
