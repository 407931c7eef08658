//! Document store and cache store traits
//!
//! Both stores are externally persisted, shared, multi-writer collections.
//! Every call is scoped by an explicit organization id; that filter is the
//! only isolation boundary in the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::{CacheEntry, DocumentType, EmbeddedDocument};
use crate::types::RequestKind;
use crate::Result;

/// A document paired with its normalized similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: EmbeddedDocument,
    pub similarity: f32,
}

/// Trait for the persisted collection of embedded reference documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Whether nearest-neighbor search over embeddings is available.
    /// When false, callers fall back to keyword search.
    fn has_vector_index(&self) -> bool;

    /// Insert a new document, returning its assigned id
    async fn insert(&self, document: EmbeddedDocument) -> Result<i64>;

    /// Replace an existing document in place (matched by id)
    async fn update(&self, document: EmbeddedDocument) -> Result<()>;

    /// Find the active document with the given source identity
    async fn find_by_source(
        &self,
        org_id: i64,
        source_model: &str,
        source_id: i64,
    ) -> Result<Option<EmbeddedDocument>>;

    /// All active documents for an organization, optionally filtered by type
    async fn find_active(
        &self,
        org_id: i64,
        types: Option<&[DocumentType]>,
    ) -> Result<Vec<EmbeddedDocument>>;

    /// Nearest-neighbor search over active documents with embeddings,
    /// ordered by descending similarity
    async fn search_by_vector(
        &self,
        org_id: i64,
        vector: &[f32],
        types: Option<&[DocumentType]>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>>;

    /// Active documents whose metadata field equals the given value
    async fn find_by_metadata(
        &self,
        org_id: i64,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<EmbeddedDocument>>;

    /// All auto-ingested documents for a source model, active or not
    async fn list_sourced(&self, org_id: i64, source_model: &str) -> Result<Vec<EmbeddedDocument>>;

    /// Delete a document by id; returns whether it existed
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// Trait for the persisted semantic cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether nearest-neighbor search over query embeddings is available
    fn has_vector_index(&self) -> bool;

    /// Unexpired entry matching the exact query hash, if any
    async fn get_by_hash(
        &self,
        org_id: i64,
        kind: RequestKind,
        query_hash: &str,
    ) -> Result<Option<CacheEntry>>;

    /// Nearest unexpired entry of the same (org, kind) by embedding
    /// similarity, with its similarity score
    async fn nearest(
        &self,
        org_id: i64,
        kind: RequestKind,
        vector: &[f32],
    ) -> Result<Option<(CacheEntry, f32)>>;

    /// Store a new entry, returning its assigned id
    async fn put(&self, entry: CacheEntry) -> Result<i64>;

    /// Increment an entry's hit counter
    async fn record_hit(&self, id: i64) -> Result<()>;

    /// Delete entries for an organization, optionally narrowed by kind
    /// and creation cutoff; returns the count removed
    async fn remove(
        &self,
        org_id: i64,
        kind: Option<RequestKind>,
        created_before: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    /// Delete all expired entries regardless of organization; returns the
    /// count removed
    async fn purge_expired(&self) -> Result<u64>;
}
