//! Unified error types for triage

use thiserror::Error;

/// Unified error type for all triage operations
#[derive(Error, Debug)]
pub enum TriageError {
    // Remote agent errors
    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Agent call timed out: {0}")]
    AgentTimeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    // Document store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Pipeline errors
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Stage error: {0}")]
    Stage(String),

    #[error("Debate error: {0}")]
    Debate(String),

    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl TriageError {
    /// Whether this error represents a missing document rather than a fault
    pub fn is_not_found(&self) -> bool {
        matches!(self, TriageError::NotFound(_))
    }
}

/// Result type alias using TriageError
pub type Result<T> = std::result::Result<T, TriageError>;
