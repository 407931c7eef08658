//! Spend-IQ insight generation pipeline.
//!
//! Assembles the workspace crates into one facade: document ingestion
//! keeps the store fresh, retrieval augments prompts, the semantic cache
//! short-circuits repeated queries, the orchestrator generates with
//! ordered failover, and the validator checks every claim against
//! organizational ground truth before the result is cached and returned.

pub mod pipeline;

pub use pipeline::{InsightPipeline, InsightRequest, InsightResponse, PipelineOutcome};

pub use siq_core::{
    DocumentType, EmbeddedDocument, GenerationOutcome, OutputSchema, PromptPayload, RequestKind,
    Severity, ValidationFinding, ValidationReport,
};
pub use siq_providers::{InsightOrchestrator, OrchestratorConfig};
pub use siq_rag::{IngestionPipeline, RetrievalService, SemanticCache};
pub use siq_validate::{OrgFacts, ResponseValidator};
