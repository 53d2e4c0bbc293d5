//! Configuration for the triage pipeline
//!
//! Loaded from `.triage/config.toml` in the working root. The decision
//! thresholds and debate weights are fixed product values; they live here as
//! named fields so they are auditable and overridable in one place.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Result, TriageError};

/// Pipeline-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Below this gather-context confidence the ticket escalates outright
    #[serde(default = "default_escalation_confidence")]
    pub escalation_confidence: f64,

    /// Projection is skipped for simple tickets at or above this decide confidence
    #[serde(default = "default_projection_skip_confidence")]
    pub projection_skip_confidence: f64,

    /// Quality score required before a learned artifact is persisted
    #[serde(default = "default_knowledge_quality_threshold")]
    pub knowledge_quality_threshold: f64,

    /// Window within which a similar knowledge write counts as a duplicate
    #[serde(default = "default_knowledge_dedup_hours")]
    pub knowledge_dedup_hours: i64,

    /// Debate scoring weights
    #[serde(default)]
    pub debate: DebateWeights,

    /// Remote agent endpoint settings
    #[serde(default)]
    pub agent: AgentEndpointConfig,
}

/// Scoring weights for the debate verdict
///
/// Only the generous role ever receives the boosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateWeights {
    #[serde(default = "default_vip_boost")]
    pub vip_boost: f64,

    #[serde(default = "default_sentiment_boost")]
    pub sentiment_boost: f64,
}

/// Remote agent endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpointConfig {
    /// Base URL of the conversational reasoning service
    #[serde(default = "default_agent_base_url")]
    pub base_url: String,

    /// Agent identity used for pipeline stages
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    /// Wall-clock timeout per call; long, remote reasoning is slow
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value providers

fn default_escalation_confidence() -> f64 {
    0.4
}

fn default_projection_skip_confidence() -> f64 {
    0.75
}

fn default_knowledge_quality_threshold() -> f64 {
    0.8
}

fn default_knowledge_dedup_hours() -> i64 {
    24
}

fn default_vip_boost() -> f64 {
    1.3
}

fn default_sentiment_boost() -> f64 {
    1.15
}

fn default_agent_base_url() -> String {
    "http://localhost:8808".to_string()
}

fn default_agent_id() -> String {
    "support-resolver".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    300
}

impl PipelineConfig {
    /// Load configuration from `.triage/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".triage/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| TriageError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.triage/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".triage");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| TriageError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            escalation_confidence: default_escalation_confidence(),
            projection_skip_confidence: default_projection_skip_confidence(),
            knowledge_quality_threshold: default_knowledge_quality_threshold(),
            knowledge_dedup_hours: default_knowledge_dedup_hours(),
            debate: DebateWeights::default(),
            agent: AgentEndpointConfig::default(),
        }
    }
}

impl Default for DebateWeights {
    fn default() -> Self {
        Self {
            vip_boost: default_vip_boost(),
            sentiment_boost: default_sentiment_boost(),
        }
    }
}

impl Default for AgentEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_agent_base_url(),
            agent_id: default_agent_id(),
            timeout_secs: default_agent_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_product_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.escalation_confidence, 0.4);
        assert_eq!(config.projection_skip_confidence, 0.75);
        assert_eq!(config.debate.vip_boost, 1.3);
        assert_eq!(config.debate.sentiment_boost, 1.15);
        assert_eq!(config.knowledge_quality_threshold, 0.8);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.escalation_confidence, 0.4);
    }

    #[test]
    fn test_write_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        PipelineConfig::write_default(dir.path()).unwrap();

        let config = PipelineConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.agent.timeout_secs, 300);
        assert_eq!(config.agent.agent_id, "support-resolver");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".triage")).unwrap();
        std::fs::write(
            dir.path().join(".triage/config.toml"),
            "escalation_confidence = 0.5\n",
        )
        .unwrap();

        let config = PipelineConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.escalation_confidence, 0.5);
        assert_eq!(config.projection_skip_confidence, 0.75);
    }
}
