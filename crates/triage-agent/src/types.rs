//! Wire types for the conversational reasoning service

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One intermediate step reported by the remote agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStep {
    /// Free-text reasoning note
    Reasoning { text: String },
    /// Tool invocation with its parameters
    ToolCall {
        tool: String,
        #[serde(default)]
        params: Value,
    },
    /// Result returned by a tool
    ToolResult {
        tool: String,
        #[serde(default)]
        result: Value,
    },
}

/// Usage counters for one or more agent calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUsage {
    pub calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: Option<String>,
}

/// Request to the remote agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseRequest {
    pub agent_id: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Response from the remote agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseResponse {
    /// Handle for continuing the same dialogue context
    pub conversation_id: String,
    /// Final free-text message
    pub message: String,
    /// Ordered step log; may have been streamed or delivered in one batch
    #[serde(default)]
    pub steps: Vec<AgentStep>,
    #[serde(default)]
    pub usage: AgentUsage,
}

/// Merge usage counters from two phases of the same stage
pub fn merge_usage(a: &AgentUsage, b: &AgentUsage) -> AgentUsage {
    AgentUsage {
        calls: a.calls + b.calls,
        input_tokens: a.input_tokens + b.input_tokens,
        output_tokens: a.output_tokens + b.output_tokens,
        model: a.model.clone().or_else(|| b.model.clone()),
    }
}

/// Merge step logs from two phases, preserving arrival order
pub fn merge_steps(a: Vec<AgentStep>, b: Vec<AgentStep>) -> Vec<AgentStep> {
    let mut merged = a;
    merged.extend(b);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_usage_sums_counters() {
        let a = AgentUsage {
            calls: 1,
            input_tokens: 100,
            output_tokens: 40,
            model: Some("reasoner-lg".to_string()),
        };
        let b = AgentUsage {
            calls: 1,
            input_tokens: 60,
            output_tokens: 90,
            model: None,
        };

        let merged = merge_usage(&a, &b);
        assert_eq!(merged.calls, 2);
        assert_eq!(merged.input_tokens, 160);
        assert_eq!(merged.output_tokens, 130);
        assert_eq!(merged.model.as_deref(), Some("reasoner-lg"));
    }

    #[test]
    fn test_merge_usage_takes_second_model_when_first_missing() {
        let a = AgentUsage::default();
        let b = AgentUsage {
            model: Some("reasoner-sm".to_string()),
            ..Default::default()
        };
        assert_eq!(merge_usage(&a, &b).model.as_deref(), Some("reasoner-sm"));
    }

    #[test]
    fn test_merge_steps_preserves_order() {
        let a = vec![AgentStep::Reasoning {
            text: "first".to_string(),
        }];
        let b = vec![
            AgentStep::ToolCall {
                tool: "lookup_order".to_string(),
                params: serde_json::json!({"order_id": "ord-1"}),
            },
            AgentStep::Reasoning {
                text: "last".to_string(),
            },
        ];

        let merged = merge_steps(a, b);
        assert_eq!(merged.len(), 3);
        assert!(matches!(&merged[0], AgentStep::Reasoning { text } if text == "first"));
        assert!(matches!(&merged[2], AgentStep::Reasoning { text } if text == "last"));
    }

    #[test]
    fn test_step_serde_tagging() {
        let step: AgentStep = serde_json::from_str(
            r#"{"type": "tool_call", "tool": "search_kb", "params": {"q": "refund policy"}}"#,
        )
        .unwrap();
        assert!(matches!(step, AgentStep::ToolCall { ref tool, .. } if tool == "search_kb"));

        let step: AgentStep = serde_json::from_str(r#"{"type": "tool_result", "tool": "search_kb"}"#)
            .unwrap();
        assert!(matches!(step, AgentStep::ToolResult { ref result, .. } if result.is_null()));
    }

    #[test]
    fn test_response_defaults() {
        let response: ConverseResponse = serde_json::from_str(
            r#"{"conversation_id": "c-1", "message": "done"}"#,
        )
        .unwrap();
        assert!(response.steps.is_empty());
        assert_eq!(response.usage.calls, 0);
    }
}
