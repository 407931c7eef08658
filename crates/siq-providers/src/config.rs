//! Provider configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use siq_core::Result;

/// Credentials and overrides for one LLM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: String,
    /// Override for OpenAI-compatible gateways and test servers
    pub base_url: Option<String>,
    /// Override for the default model of the backend
    pub model: Option<String>,
}

impl ProviderCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            model: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Configuration for the provider orchestrator.
///
/// Backends whose credentials are absent from the map are simply not
/// constructed; that is a degraded configuration, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub primary: String,
    pub credentials: HashMap<String, ProviderCredentials>,
    pub fallback_order: Vec<String>,
    pub fallback_enabled: bool,
}

impl OrchestratorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut credentials = HashMap::new();
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            let mut creds = ProviderCredentials::new(key);
            if let Ok(url) = env::var("OPENAI_BASE_URL") {
                creds.base_url = Some(url);
            }
            if let Ok(model) = env::var("OPENAI_MODEL") {
                creds.model = Some(model);
            }
            credentials.insert("openai".to_string(), creds);
        }
        if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
            let mut creds = ProviderCredentials::new(key);
            if let Ok(model) = env::var("ANTHROPIC_MODEL") {
                creds.model = Some(model);
            }
            credentials.insert("anthropic".to_string(), creds);
        }

        let primary = env::var("SIQ_PRIMARY_PROVIDER").unwrap_or_else(|_| "openai".to_string());

        let fallback_order = env::var("SIQ_FALLBACK_ORDER")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["openai".to_string(), "anthropic".to_string()]);

        let fallback_enabled = env::var("SIQ_ENABLE_FALLBACK")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Ok(Self {
            primary,
            credentials,
            fallback_order,
            fallback_enabled,
        })
    }

    /// Create configuration with explicit values
    pub fn new(primary: impl Into<String>, credentials: HashMap<String, ProviderCredentials>) -> Self {
        let primary = primary.into();
        Self {
            fallback_order: vec![primary.clone()],
            primary,
            credentials,
            fallback_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_builder() {
        let creds = ProviderCredentials::new("sk-test")
            .with_base_url("http://localhost:8080/v1")
            .with_model("gpt-4o-mini");
        assert_eq!(creds.api_key, "sk-test");
        assert_eq!(creds.base_url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(creds.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_explicit_config() {
        let mut credentials = HashMap::new();
        credentials.insert("openai".to_string(), ProviderCredentials::new("k"));
        let config = OrchestratorConfig::new("openai", credentials);
        assert_eq!(config.primary, "openai");
        assert!(config.fallback_enabled);
        assert_eq!(config.fallback_order, vec!["openai".to_string()]);
    }
}
