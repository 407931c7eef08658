//! OpenAI-compatible chat backend
//!
//! Structured output is elicited with a forced function call; a response
//! that does not carry the expected tool call is reported as a provider
//! error, which the orchestrator treats like any transport failure.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use siq_core::{Error, LlmBackend, OutputSchema, PromptPayload, Result};

use crate::config::ProviderCredentials;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI chat-completions backend
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Serialize)]
struct ToolSpec<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    function: FunctionSpec<'a>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    tools: Vec<ToolSpec<'a>>,
    tool_choice: serde_json::Value,
}

#[derive(Deserialize)]
struct FunctionCall {
    arguments: String,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

impl OpenAiBackend {
    /// Create a new backend from credentials. The HTTP client is built
    /// once here; there is no lazy initialization.
    pub fn new(credentials: &ProviderCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: credentials.api_key.clone(),
            base_url: credentials
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: credentials
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    fn wire_messages(&self, payload: &PromptPayload) -> Vec<WireMessage> {
        let mut messages = Vec::with_capacity(payload.messages.len() + 1);
        if let Some(system) = &payload.system {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for m in &payload.messages {
            messages.push(WireMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            });
        }
        messages
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate_structured(
        &self,
        payload: &PromptPayload,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value> {
        let request_body = ChatRequest {
            model: &self.model,
            messages: self.wire_messages(payload),
            max_tokens: payload.max_tokens,
            temperature: payload.temperature,
            tools: vec![ToolSpec {
                kind: "function",
                function: FunctionSpec {
                    name: &schema.name,
                    description: &schema.description,
                    parameters: &schema.parameters,
                },
            }],
            tool_choice: serde_json::json!({
                "type": "function",
                "function": {"name": schema.name},
            }),
        };

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Provider(format!(
                "OpenAI request failed with status {}: {}",
                status, error_text
            )));
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))?;

        let arguments = data
            .choices
            .first()
            .and_then(|c| c.message.tool_calls.as_ref())
            .and_then(|calls| calls.first())
            .map(|call| call.function.arguments.as_str())
            .ok_or_else(|| {
                Error::Provider("OpenAI response did not honor the requested schema".to_string())
            })?;

        serde_json::from_str(arguments).map_err(|e| {
            Error::Provider(format!("OpenAI returned malformed structured output: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_without_api_key() {
        let backend = OpenAiBackend::new(&ProviderCredentials::new("")).unwrap();
        assert!(!backend.is_available());
    }

    #[test]
    fn test_defaults_and_overrides() {
        let backend = OpenAiBackend::new(&ProviderCredentials::new("sk-test")).unwrap();
        assert_eq!(backend.model_id(), DEFAULT_MODEL);
        assert_eq!(backend.name(), "openai");

        let backend = OpenAiBackend::new(
            &ProviderCredentials::new("sk-test")
                .with_base_url("http://localhost:9999/v1")
                .with_model("gpt-4o"),
        )
        .unwrap();
        assert_eq!(backend.model_id(), "gpt-4o");
        assert_eq!(backend.base_url, "http://localhost:9999/v1");
    }

    #[test]
    fn test_wire_messages_include_system() {
        let backend = OpenAiBackend::new(&ProviderCredentials::new("k")).unwrap();
        let mut payload = PromptPayload::default();
        payload.system = Some("You are a procurement analyst.".to_string());
        payload.messages.push(siq_core::ChatMessage::user("hello"));

        let wire = backend.wire_messages(&payload);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
    }
}
