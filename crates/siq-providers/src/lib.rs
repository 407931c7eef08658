//! LLM backends, embedding gateway, and failover orchestrator for the
//! Spend-IQ insight pipeline
//!
//! The backends are a closed set behind the `LlmBackend` trait, selected
//! by a configuration-driven ordered list. Client handles are built at
//! construction time and reused for the life of the backend.

pub mod anthropic;
pub mod config;
pub mod embedding;
pub mod openai;
pub mod orchestrator;

pub use anthropic::AnthropicBackend;
pub use config::{OrchestratorConfig, ProviderCredentials};
pub use embedding::OpenAiEmbeddings;
pub use openai::OpenAiBackend;
pub use orchestrator::InsightOrchestrator;
