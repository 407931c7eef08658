//! LLM backend trait and generation types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::types::HealthStatus;
use crate::Result;

/// One chat message in a prompt payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Cross-backend prompt payload for one structured generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for PromptPayload {
    fn default() -> Self {
        Self {
            system: None,
            messages: Vec::new(),
            max_tokens: 2000,
            temperature: Some(0.2),
        }
    }
}

impl PromptPayload {
    /// Minimal payload used by health probes.
    pub fn probe() -> Self {
        Self {
            system: None,
            messages: vec![ChatMessage::user("ping")],
            max_tokens: 8,
            temperature: None,
        }
    }
}

/// Backend-neutral description of the structured output we expect.
///
/// Each backend maps this to its own native structured-output mechanism
/// (a forced tool/function call).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the expected payload
    pub parameters: serde_json::Value,
}

impl OutputSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Trivial schema used by health probes.
    pub fn probe() -> Self {
        Self::new(
            "ack",
            "Acknowledge the probe",
            serde_json::json!({
                "type": "object",
                "properties": {"ok": {"type": "boolean"}},
            }),
        )
    }
}

/// A structured generation result annotated with provenance, required for
/// audit and for validation-severity review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredInsight {
    pub payload: serde_json::Value,
    pub provider: String,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

/// Outcome of an orchestrated generation call.
///
/// `Unavailable` is the distinct "no result" signal: every candidate was
/// skipped or failed, and callers should degrade gracefully rather than
/// treat it as a bug.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Generated(StructuredInsight),
    Unavailable { last_error: Option<String> },
}

/// Trait for interchangeable LLM backends.
///
/// Transport failures and schema violations are both reported as errors;
/// the orchestrator treats them identically when deciding to fail over.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stable backend name used in configuration and provenance
    fn name(&self) -> &str;

    /// Identifier of the model this backend generates with
    fn model_id(&self) -> &str;

    /// Whether the backend is configured and callable right now
    fn is_available(&self) -> bool;

    /// Generate a response constrained to the given output schema
    async fn generate_structured(
        &self,
        payload: &PromptPayload,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value>;

    /// Cheap synchronous probe measuring wall-clock latency. Never fails;
    /// errors become part of the returned status.
    async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        match self
            .generate_structured(&PromptPayload::probe(), &OutputSchema::probe())
            .await
        {
            Ok(_) => HealthStatus {
                healthy: true,
                latency_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(e) => HealthStatus {
                healthy: false,
                latency_ms: started.elapsed().as_millis() as u64,
                error: Some(e.to_string()),
            },
        }
    }
}
