//! Core traits and types for the Spend-IQ insight pipeline
//!
//! This crate defines the fundamental traits and types used across the
//! insight generation pipeline: the LLM backend and embedding gateway
//! contracts, the document/cache store contracts, and the shared data
//! model (embedded documents, cache entries, validation findings).

pub mod document;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod store;
pub mod types;

pub use document::{CacheEntry, DocumentType, EmbeddedDocument, EMBEDDING_DIM};
pub use embedding::{truncate_for_embedding, EmbeddingClient, MAX_EMBED_CHARS};
pub use error::{Error, Result};
pub use llm::{
    ChatMessage, GenerationOutcome, LlmBackend, OutputSchema, PromptPayload, StructuredInsight,
};
pub use store::{CacheStore, DocumentStore, ScoredDocument};
pub use types::{
    HealthStatus, ProviderState, RequestKind, Severity, ValidationFinding, ValidationReport,
};
