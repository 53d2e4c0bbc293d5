//! Complexity routing
//!
//! The classifier's complexity label drives how much work downstream stages
//! spend: research depth during context gathering and whether the projection
//! stage can be skipped outright for confident simple cases.

use std::fmt;
use std::str::FromStr;
use triage_core::{PipelineConfig, TriageError};

/// Ticket complexity tier assigned during classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl Complexity {
    /// Map the classifier's free-text label; anything unrecognized lands on
    /// the moderate middle tier.
    pub fn from_label(label: Option<&str>) -> Self {
        label
            .and_then(|l| l.trim().to_lowercase().parse().ok())
            .unwrap_or_default()
    }

    /// Number of research phases the context-gathering stage runs
    pub fn research_phases(self) -> usize {
        match self {
            Complexity::Simple => 1,
            Complexity::Moderate => 2,
            Complexity::Complex => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Complexity {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" | "low" | "trivial" => Ok(Complexity::Simple),
            "moderate" | "medium" => Ok(Complexity::Moderate),
            "complex" | "high" => Ok(Complexity::Complex),
            other => Err(TriageError::Pipeline(format!(
                "unknown complexity label: {}",
                other
            ))),
        }
    }
}

/// Whether the projection stage can be skipped: only simple tickets whose
/// decision confidence clears the configured threshold qualify.
pub fn should_skip_projection(
    complexity: Complexity,
    decide_confidence: Option<f64>,
    config: &PipelineConfig,
) -> bool {
    complexity == Complexity::Simple
        && decide_confidence.is_some_and(|c| c >= config.projection_skip_confidence)
}
