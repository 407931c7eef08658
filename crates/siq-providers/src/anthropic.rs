//! Anthropic messages backend
//!
//! Structured output is elicited through forced tool use; the first
//! `tool_use` content block carries the payload.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use siq_core::{Error, LlmBackend, OutputSchema, PromptPayload, Result};

use crate::config::ProviderCredentials;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages backend
pub struct AnthropicBackend {
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
struct ToolSpec<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    tools: Vec<ToolSpec<'a>>,
    tool_choice: serde_json::Value,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    input: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

impl AnthropicBackend {
    /// Create a new backend from credentials
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
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
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
        let messages = payload
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect();

        let request_body = MessagesRequest {
            model: &self.model,
            max_tokens: payload.max_tokens,
            system: payload.system.as_deref(),
            messages,
            temperature: payload.temperature,
            tools: vec![ToolSpec {
                name: &schema.name,
                description: &schema.description,
                input_schema: &schema.parameters,
            }],
            tool_choice: serde_json::json!({"type": "tool", "name": schema.name}),
        };

        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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
                "Anthropic request failed with status {}: {}",
                status, error_text
            )));
        }

        let data: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))?;

        data.content
            .into_iter()
            .find(|block| block.kind == "tool_use")
            .and_then(|block| block.input)
            .ok_or_else(|| {
                Error::Provider("Anthropic response did not honor the requested schema".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_without_api_key() {
        let backend = AnthropicBackend::new(&ProviderCredentials::new("")).unwrap();
        assert!(!backend.is_available());
    }

    #[test]
    fn test_model_override() {
        let backend = AnthropicBackend::new(
            &ProviderCredentials::new("sk-ant").with_model("claude-sonnet-4-5"),
        )
        .unwrap();
        assert_eq!(backend.model_id(), "claude-sonnet-4-5");
        assert_eq!(backend.name(), "anthropic");
    }
}
