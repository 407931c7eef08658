//! Retrieval, semantic caching, and document ingestion for Spend-IQ.
//!
//! Three services share one embedded-document model: [`RetrievalService`]
//! pulls relevant context into prompts, [`SemanticCache`] short-circuits
//! repeated queries, and [`IngestionPipeline`] keeps the document store
//! in step with upstream data. [`memory`] provides in-process stores for
//! development and tests.

pub mod cache;
pub mod ingest;
pub mod memory;
pub mod retrieval;

pub use cache::{normalize_query, query_hash, SemanticCache};
pub use ingest::{
    IngestReport, IngestionPipeline, OutcomeFeedback, SourceRegistry, SupplierAggregate,
};
pub use memory::{cosine_similarity, InMemoryCacheStore, InMemoryDocumentStore};
pub use retrieval::{RetrievalService, RetrievedDocument};
