//! HTTP client for the conversational reasoning service
//!
//! Key design: one attempt per call with a long bounded timeout. Retry after
//! a failed phase belongs to the phase-recovery mechanism in the pipeline,
//! never to this client.

use crate::types::{AgentStep, ConverseRequest, ConverseResponse};
use async_trait::async_trait;
use std::time::Duration;
use triage_core::{AgentEndpointConfig, Result, TriageError};

/// Callback invoked for each step as it is observed
pub type StepSink<'a> = &'a (dyn Fn(&AgentStep) + Send + Sync);

/// Boundary trait for the remote reasoning service
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Issue a conversational request and collect the full response
    async fn converse(
        &self,
        agent_id: &str,
        input: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConverseResponse>;

    /// Streaming variant: steps are delivered to `on_step` before the final
    /// object. The default delivers the batch response's steps in order,
    /// which is indistinguishable to callers from true incremental delivery.
    async fn converse_streaming(
        &self,
        agent_id: &str,
        input: &str,
        conversation_id: Option<&str>,
        on_step: StepSink<'_>,
    ) -> Result<ConverseResponse> {
        let response = self.converse(agent_id, input, conversation_id).await?;
        for step in &response.steps {
            on_step(step);
        }
        Ok(response)
    }
}

/// HTTP implementation of [`AgentClient`]
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAgentClient {
    /// Build a client from endpoint configuration
    pub fn new(config: &AgentEndpointConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TriageError::Agent(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn converse(
        &self,
        agent_id: &str,
        input: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConverseResponse> {
        let request = ConverseRequest {
            agent_id: agent_id.to_string(),
            input: input.to_string(),
            conversation_id: conversation_id.map(str::to_string),
        };

        tracing::debug!(
            agent_id,
            continuing = conversation_id.is_some(),
            input_chars = input.len(),
            "Sending converse request"
        );

        let response = self
            .http
            .post(format!("{}/converse", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TriageError::AgentTimeout(format!("Converse call timed out: {}", e))
                } else {
                    TriageError::Agent(format!("Failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(TriageError::Agent(format!(
                "Agent service error {}: {}",
                status, error_text
            )));
        }

        let parsed: ConverseResponse = response
            .json()
            .await
            .map_err(|e| TriageError::Agent(format!("Failed to parse response: {}", e)))?;

        tracing::info!(
            agent_id,
            conversation_id = %parsed.conversation_id,
            steps = parsed.steps.len(),
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            "Converse call complete"
        );

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentUsage;
    use std::sync::Mutex;

    struct ScriptedClient {
        response: ConverseResponse,
    }

    #[async_trait]
    impl AgentClient for ScriptedClient {
        async fn converse(
            &self,
            _agent_id: &str,
            _input: &str,
            _conversation_id: Option<&str>,
        ) -> Result<ConverseResponse> {
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn test_default_streaming_replays_steps_in_order() {
        let client = ScriptedClient {
            response: ConverseResponse {
                conversation_id: "c-1".to_string(),
                message: "done".to_string(),
                steps: vec![
                    AgentStep::Reasoning {
                        text: "a".to_string(),
                    },
                    AgentStep::ToolCall {
                        tool: "lookup".to_string(),
                        params: serde_json::json!({}),
                    },
                ],
                usage: AgentUsage::default(),
            },
        };

        let seen = Mutex::new(Vec::new());
        let response = client
            .converse_streaming("support-resolver", "hi", None, &|step| {
                let label = match step {
                    AgentStep::Reasoning { .. } => "reasoning",
                    AgentStep::ToolCall { .. } => "tool_call",
                    AgentStep::ToolResult { .. } => "tool_result",
                };
                seen.lock().unwrap().push(label);
            })
            .await
            .unwrap();

        assert_eq!(response.conversation_id, "c-1");
        assert_eq!(*seen.lock().unwrap(), vec!["reasoning", "tool_call"]);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = AgentEndpointConfig {
            base_url: "http://agent.local/".to_string(),
            ..Default::default()
        };
        let client = HttpAgentClient::new(&config).unwrap();
        assert_eq!(client.base_url, "http://agent.local");
    }
}
