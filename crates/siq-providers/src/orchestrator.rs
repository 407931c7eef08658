//! Provider orchestrator with ordered failover
//!
//! Presents one generation contract over the configured LLM backends.
//! Candidates are tried in order (primary first, then the fallback order
//! minus the primary); the first success wins and no later candidate is
//! attempted. Per-backend errors are recorded and never propagate past
//! the orchestrator; they only affect the failover decision.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use siq_core::{
    Error, GenerationOutcome, HealthStatus, LlmBackend, OutputSchema, PromptPayload,
    ProviderState, Result, StructuredInsight,
};

use crate::anthropic::AnthropicBackend;
use crate::config::OrchestratorConfig;
use crate::openai::OpenAiBackend;

/// Orchestrates structured generation across interchangeable backends.
pub struct InsightOrchestrator {
    backends: HashMap<String, Arc<dyn LlmBackend>>,
    primary: String,
    fallback_order: Vec<String>,
    fallback_enabled: bool,
    states: Mutex<HashMap<String, ProviderState>>,
}

impl InsightOrchestrator {
    /// Build the orchestrator from configuration. Names without
    /// credentials are simply absent from the backend set.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let mut backends: Vec<Arc<dyn LlmBackend>> = Vec::new();
        for (name, credentials) in &config.credentials {
            match name.as_str() {
                "openai" => backends.push(Arc::new(OpenAiBackend::new(credentials)?)),
                "anthropic" => backends.push(Arc::new(AnthropicBackend::new(credentials)?)),
                other => {
                    warn!(provider = other, "Ignoring credentials for unknown provider");
                }
            }
        }

        Ok(Self::new(
            config.primary.clone(),
            backends,
            config.fallback_order.clone(),
            config.fallback_enabled,
        ))
    }

    /// Build the orchestrator from already-constructed backends. Used by
    /// tests and by callers supplying custom backends.
    pub fn new(
        primary: impl Into<String>,
        backends: Vec<Arc<dyn LlmBackend>>,
        fallback_order: Vec<String>,
        fallback_enabled: bool,
    ) -> Self {
        let backends: HashMap<String, Arc<dyn LlmBackend>> = backends
            .into_iter()
            .map(|b| (b.name().to_string(), b))
            .collect();

        let states = backends
            .keys()
            .map(|name| (name.clone(), ProviderState::new(name.clone())))
            .collect();

        Self {
            backends,
            primary: primary.into(),
            fallback_order,
            fallback_enabled,
            states: Mutex::new(states),
        }
    }

    /// Candidate names in attempt order: primary first, then the fallback
    /// order minus the primary, the latter only when fallback is enabled.
    fn candidate_chain(&self) -> Vec<&str> {
        let mut chain = vec![self.primary.as_str()];
        if self.fallback_enabled {
            for name in &self.fallback_order {
                if name != &self.primary {
                    chain.push(name.as_str());
                }
            }
        }
        chain
    }

    /// Generate a structured response with ordered failover.
    ///
    /// Returns `GenerationOutcome::Unavailable` when every candidate was
    /// skipped or failed, carrying the last error seen. Having no backend
    /// configured at all is a hard error surfaced immediately.
    ///
    /// The pipeline defines no internal deadline: callers that need one
    /// wrap this future in `tokio::time::timeout`, which cancels the
    /// remaining candidate chain when it fires.
    pub async fn generate(
        &self,
        payload: &PromptPayload,
        schema: &OutputSchema,
    ) -> Result<GenerationOutcome> {
        if self.backends.is_empty() {
            return Err(Error::Provider(
                "No insight backend configured".to_string(),
            ));
        }

        let mut last_error: Option<String> = None;

        for name in self.candidate_chain() {
            let Some(backend) = self.backends.get(name) else {
                debug!(provider = name, "Skipping candidate: not configured");
                continue;
            };
            if !backend.is_available() {
                debug!(provider = name, "Skipping candidate: not available");
                continue;
            }

            match backend.generate_structured(payload, schema).await {
                Ok(value) => {
                    self.record_success(name).await;
                    return Ok(GenerationOutcome::Generated(StructuredInsight {
                        payload: value,
                        provider: name.to_string(),
                        model: backend.model_id().to_string(),
                        generated_at: Utc::now(),
                    }));
                }
                Err(e) => {
                    warn!(provider = name, error = %e, "Backend failed");
                    let message = e.to_string();
                    self.record_failure(name, &message).await;
                    last_error = Some(message);
                    if !self.fallback_enabled {
                        break;
                    }
                }
            }
        }

        debug!("All candidates skipped or failed");
        Ok(GenerationOutcome::Unavailable { last_error })
    }

    async fn record_success(&self, name: &str) {
        let mut states = self.states.lock().await;
        for state in states.values_mut() {
            state.last_success = false;
        }
        if let Some(state) = states.get_mut(name) {
            state.available = true;
            state.last_error = None;
            state.last_success = true;
        }
    }

    async fn record_failure(&self, name: &str, message: &str) {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(name) {
            state.available = false;
            state.last_error = Some(message.to_string());
            state.last_success = false;
        }
    }

    /// Probe one backend. Unknown names yield an unhealthy status rather
    /// than an error.
    pub async fn health_check(&self, name: &str) -> HealthStatus {
        match self.backends.get(name) {
            Some(backend) => backend.health_check().await,
            None => HealthStatus {
                healthy: false,
                latency_ms: 0,
                error: Some(format!("Provider '{}' is not configured", name)),
            },
        }
    }

    /// Probe every configured backend.
    pub async fn health_check_all(&self) -> HashMap<String, HealthStatus> {
        let mut statuses = HashMap::new();
        for (name, backend) in &self.backends {
            statuses.insert(name.clone(), backend.health_check().await);
        }
        statuses
    }

    /// Snapshot of per-backend states.
    pub async fn provider_states(&self) -> Vec<ProviderState> {
        let states = self.states.lock().await;
        let mut snapshot: Vec<ProviderState> = states.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name));
        snapshot
    }

    /// Names of the configured backends.
    pub fn configured_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}
