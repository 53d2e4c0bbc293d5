//! Remote reasoning agent boundary for triage
//!
//! The remote service accepts natural-language input plus an optional
//! conversation handle and returns free text, a step log of intermediate
//! reasoning/tool activity, and usage counters. Everything the rest of the
//! workspace knows about that service goes through the [`AgentClient`] trait.

pub mod client;
pub mod parser;
pub mod types;

pub use client::{AgentClient, HttpAgentClient, StepSink};
pub use parser::{parse_structured, ParseOutcome};
pub use types::{merge_steps, merge_usage, AgentStep, AgentUsage, ConverseRequest, ConverseResponse};
