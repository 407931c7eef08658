//! Semantic cache
//!
//! Short-circuits repeated or near-duplicate queries before any paid
//! generation call. The exact-hash path is free; the similarity path
//! needs a vector index and an embedding gateway and uses a stricter
//! threshold than retrieval, because it must detect near-duplicate
//! queries rather than topically related documents.
//!
//! The lookup-then-generate-then-store sequence is not atomic: two
//! concurrent identical requests may both miss and both write an entry.
//! Last write wins; TTL bounds the cost of the race.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use siq_core::{CacheEntry, CacheStore, EmbeddingClient, RequestKind, Result};

/// Minimum similarity for a near-duplicate query hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.90;

/// Default entry lifetime.
pub fn default_ttl() -> Duration {
    Duration::hours(1)
}

/// Normalize a query before hashing: trimmed, lowercased, whitespace
/// collapsed.
pub fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic hash of the normalized query text.
pub fn query_hash(query: &str) -> String {
    format!("{:x}", md5::compute(normalize_query(query).as_bytes()))
}

/// Semantic cache over a cache store.
pub struct SemanticCache {
    store: Arc<dyn CacheStore>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    similarity_threshold: f32,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn CacheStore>, embedder: Option<Arc<dyn EmbeddingClient>>) -> Self {
        Self {
            store,
            embedder,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Look up a cached response for a query. Exact-hash match first (no
    /// embedding cost), then nearest-neighbor when infrastructure allows.
    /// Any hit bumps the entry's hit counter.
    pub async fn lookup(
        &self,
        org_id: i64,
        query: &str,
        kind: RequestKind,
    ) -> Result<Option<serde_json::Value>> {
        let hash = query_hash(query);

        if let Some(entry) = self.store.get_by_hash(org_id, kind, &hash).await? {
            debug!(org_id, kind = %kind, "Cache hit (exact hash)");
            self.store.record_hit(entry.id).await?;
            return Ok(Some(entry.response));
        }

        if !self.store.has_vector_index() {
            return Ok(None);
        }
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };

        let vector = match embedder.embed(&normalize_query(query)).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Embedding failed during cache lookup, treating as miss");
                return Ok(None);
            }
        };

        if let Some((entry, similarity)) = self.store.nearest(org_id, kind, &vector).await? {
            if similarity >= self.similarity_threshold {
                debug!(org_id, kind = %kind, similarity, "Cache hit (similarity)");
                self.store.record_hit(entry.id).await?;
                return Ok(Some(entry.response));
            }
        }

        Ok(None)
    }

    /// Store a response under the exact query hash. The query is embedded
    /// when infrastructure allows, enabling future similarity hits;
    /// otherwise storage silently degrades to hash-only.
    pub async fn store(
        &self,
        org_id: i64,
        query: &str,
        response: serde_json::Value,
        kind: RequestKind,
        ttl: Option<Duration>,
    ) -> Result<i64> {
        let embedding = if self.store.has_vector_index() {
            match &self.embedder {
                Some(embedder) => match embedder.embed(&normalize_query(query)).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        debug!(error = %e, "Embedding failed during cache store, storing hash-only");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        let entry = CacheEntry::new(
            org_id,
            kind,
            query_hash(query),
            embedding,
            response,
            ttl.unwrap_or_else(default_ttl),
        );
        self.store.put(entry).await
    }

    /// Delete matching entries for an organization, returning the count
    /// removed.
    pub async fn invalidate(
        &self,
        org_id: i64,
        kind: Option<RequestKind>,
        older_than_hours: Option<i64>,
    ) -> Result<u64> {
        let cutoff = older_than_hours.map(|h| Utc::now() - Duration::hours(h));
        let removed = self.store.remove(org_id, kind, cutoff).await?;
        info!(org_id, removed, "Cache invalidated");
        Ok(removed)
    }

    /// Delete all expired entries across every organization.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let removed = self.store.purge_expired().await?;
        if removed > 0 {
            info!(removed, "Expired cache entries swept");
        }
        Ok(removed)
    }
}
