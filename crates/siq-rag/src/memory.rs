//! In-memory document and cache stores
//!
//! The default stores for deployments without a vector database, and the
//! stores every test runs against. Vector-index availability is a toggle
//! so the keyword/hash fallback paths can be exercised.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use siq_core::{
    CacheEntry, CacheStore, DocumentStore, DocumentType, EmbeddedDocument, Error, RequestKind,
    Result, ScoredDocument,
};

/// Cosine similarity between two vectors, zero when shapes differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// In-memory document store
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<i64, EmbeddedDocument>>>,
    next_id: AtomicI64,
    vector_index: bool,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            vector_index: true,
        }
    }

    /// Disable or enable nearest-neighbor search, forcing callers onto
    /// their keyword/hash fallback paths.
    pub fn with_vector_index(mut self, available: bool) -> Self {
        self.vector_index = available;
        self
    }

    fn matches_types(doc: &EmbeddedDocument, types: Option<&[DocumentType]>) -> bool {
        match types {
            Some(list) => list.contains(&doc.document_type),
            None => true,
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn has_vector_index(&self) -> bool {
        self.vector_index
    }

    async fn insert(&self, mut document: EmbeddedDocument) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        document.id = id;
        let mut docs = self
            .documents
            .write()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;
        docs.insert(id, document);
        Ok(id)
    }

    async fn update(&self, document: EmbeddedDocument) -> Result<()> {
        let mut docs = self
            .documents
            .write()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;
        if !docs.contains_key(&document.id) {
            return Err(Error::DocumentStore(format!(
                "Document {} not found",
                document.id
            )));
        }
        docs.insert(document.id, document);
        Ok(())
    }

    async fn find_by_source(
        &self,
        org_id: i64,
        source_model: &str,
        source_id: i64,
    ) -> Result<Option<EmbeddedDocument>> {
        let docs = self
            .documents
            .read()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;
        Ok(docs
            .values()
            .find(|d| {
                d.org_id == org_id
                    && d.is_active
                    && d.source_model.as_deref() == Some(source_model)
                    && d.source_id == Some(source_id)
            })
            .cloned())
    }

    async fn find_active(
        &self,
        org_id: i64,
        types: Option<&[DocumentType]>,
    ) -> Result<Vec<EmbeddedDocument>> {
        let docs = self
            .documents
            .read()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;
        let mut result: Vec<EmbeddedDocument> = docs
            .values()
            .filter(|d| d.org_id == org_id && d.is_active && Self::matches_types(d, types))
            .cloned()
            .collect();
        result.sort_by_key(|d| d.id);
        Ok(result)
    }

    async fn search_by_vector(
        &self,
        org_id: i64,
        vector: &[f32],
        types: Option<&[DocumentType]>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        if !self.vector_index {
            return Err(Error::DocumentStore(
                "Vector index not available".to_string(),
            ));
        }

        let docs = self
            .documents
            .read()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;

        let mut scored: Vec<ScoredDocument> = docs
            .values()
            .filter(|d| d.org_id == org_id && d.is_active && Self::matches_types(d, types))
            .filter_map(|d| {
                d.embedding.as_ref().map(|embedding| ScoredDocument {
                    similarity: cosine_similarity(vector, embedding),
                    document: d.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn find_by_metadata(
        &self,
        org_id: i64,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<EmbeddedDocument>> {
        let docs = self
            .documents
            .read()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;
        let mut result: Vec<EmbeddedDocument> = docs
            .values()
            .filter(|d| d.org_id == org_id && d.is_active && d.metadata.get(key) == Some(value))
            .cloned()
            .collect();
        result.sort_by_key(|d| d.id);
        Ok(result)
    }

    async fn list_sourced(&self, org_id: i64, source_model: &str) -> Result<Vec<EmbeddedDocument>> {
        let docs = self
            .documents
            .read()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;
        let mut result: Vec<EmbeddedDocument> = docs
            .values()
            .filter(|d| d.org_id == org_id && d.source_model.as_deref() == Some(source_model))
            .cloned()
            .collect();
        result.sort_by_key(|d| d.id);
        Ok(result)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let mut docs = self
            .documents
            .write()
            .map_err(|e| Error::DocumentStore(format!("Lock error: {}", e)))?;
        Ok(docs.remove(&id).is_some())
    }
}

/// In-memory cache store
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<i64, CacheEntry>>>,
    next_id: AtomicI64,
    vector_index: bool,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            vector_index: true,
        }
    }

    pub fn with_vector_index(mut self, available: bool) -> Self {
        self.vector_index = available;
        self
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    fn has_vector_index(&self) -> bool {
        self.vector_index
    }

    async fn get_by_hash(
        &self,
        org_id: i64,
        kind: RequestKind,
        query_hash: &str,
    ) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        let entries = self
            .entries
            .read()
            .map_err(|e| Error::Cache(format!("Lock error: {}", e)))?;
        Ok(entries
            .values()
            .filter(|e| {
                e.org_id == org_id
                    && e.request_kind == kind
                    && e.query_hash == query_hash
                    && !e.is_expired(now)
            })
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn nearest(
        &self,
        org_id: i64,
        kind: RequestKind,
        vector: &[f32],
    ) -> Result<Option<(CacheEntry, f32)>> {
        if !self.vector_index {
            return Err(Error::Cache("Vector index not available".to_string()));
        }

        let now = Utc::now();
        let entries = self
            .entries
            .read()
            .map_err(|e| Error::Cache(format!("Lock error: {}", e)))?;

        let mut best: Option<(CacheEntry, f32)> = None;
        for entry in entries.values() {
            if entry.org_id != org_id || entry.request_kind != kind || entry.is_expired(now) {
                continue;
            }
            let Some(embedding) = &entry.query_embedding else {
                continue;
            };
            let similarity = cosine_similarity(vector, embedding);
            if best.as_ref().map_or(true, |(_, s)| similarity > *s) {
                best = Some((entry.clone(), similarity));
            }
        }
        Ok(best)
    }

    async fn put(&self, mut entry: CacheEntry) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        entry.id = id;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::Cache(format!("Lock error: {}", e)))?;
        entries.insert(id, entry);
        Ok(id)
    }

    async fn record_hit(&self, id: i64) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::Cache(format!("Lock error: {}", e)))?;
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.hit_count += 1;
                Ok(())
            }
            None => Err(Error::Cache(format!("Cache entry {} not found", id))),
        }
    }

    async fn remove(
        &self,
        org_id: i64,
        kind: Option<RequestKind>,
        created_before: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::Cache(format!("Lock error: {}", e)))?;
        let before = entries.len();
        entries.retain(|_, e| {
            if e.org_id != org_id {
                return true;
            }
            if let Some(k) = kind {
                if e.request_kind != k {
                    return true;
                }
            }
            if let Some(cutoff) = created_before {
                if e.created_at >= cutoff {
                    return true;
                }
            }
            false
        });
        Ok((before - entries.len()) as u64)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::Cache(format!("Lock error: {}", e)))?;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_document_store_round_trip() {
        let store = InMemoryDocumentStore::new();

        let doc = EmbeddedDocument::new(
            1,
            DocumentType::SupplierProfile,
            "Acme Corp",
            "Acme Corp: $120,000 across 34 transactions",
        )
        .with_source("supplier", 7);

        let id = store.insert(doc).await.unwrap();
        assert!(id > 0);

        let found = store.find_by_source(1, "supplier", 7).await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().id, id);

        // Other orgs never see it
        let other_org = store.find_by_source(2, "supplier", 7).await.unwrap();
        assert!(other_org.is_none());
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let store = InMemoryDocumentStore::new();

        let close = EmbeddedDocument::new(1, DocumentType::Policy, "close", "close")
            .with_embedding(Some(vec![1.0, 0.0]));
        let far = EmbeddedDocument::new(1, DocumentType::Policy, "far", "far")
            .with_embedding(Some(vec![0.0, 1.0]));
        store.insert(far).await.unwrap();
        store.insert(close).await.unwrap();

        let hits = store
            .search_by_vector(1, &[1.0, 0.0], None, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.title, "close");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn test_vector_search_unavailable_without_index() {
        let store = InMemoryDocumentStore::new().with_vector_index(false);
        assert!(!store.has_vector_index());
        let result = store.search_by_vector(1, &[1.0], None, 5).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_metadata_lookup() {
        let store = InMemoryDocumentStore::new();
        let doc = EmbeddedDocument::new(1, DocumentType::SupplierProfile, "Acme", "profile")
            .with_metadata(json!({"supplier_id": 42}));
        store.insert(doc).await.unwrap();

        let hits = store.find_by_metadata(1, "supplier_id", &json!(42)).await.unwrap();
        assert_eq!(hits.len(), 1);
        let misses = store.find_by_metadata(1, "supplier_id", &json!(43)).await.unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_cache_store_expiry_and_hits() {
        let store = InMemoryCacheStore::new();

        let live = CacheEntry::new(
            1,
            RequestKind::Enhance,
            "hash-a",
            None,
            json!({"summary": "live"}),
            chrono::Duration::hours(1),
        );
        let dead = CacheEntry::new(
            1,
            RequestKind::Enhance,
            "hash-b",
            None,
            json!({"summary": "dead"}),
            chrono::Duration::hours(-1),
        );

        let live_id = store.put(live).await.unwrap();
        store.put(dead).await.unwrap();

        // Expired entries are invisible even before physical deletion
        assert!(store
            .get_by_hash(1, RequestKind::Enhance, "hash-b")
            .await
            .unwrap()
            .is_none());

        let found = store
            .get_by_hash(1, RequestKind::Enhance, "hash-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, live_id);

        store.record_hit(live_id).await.unwrap();
        let found = store
            .get_by_hash(1, RequestKind::Enhance, "hash-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.hit_count, 1);

        // The global sweep removes only the expired entry
        let purged = store.purge_expired().await.unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn test_cache_remove_filters() {
        let store = InMemoryCacheStore::new();
        for (kind, hash) in [
            (RequestKind::Enhance, "h1"),
            (RequestKind::Enhance, "h2"),
            (RequestKind::DeepAnalysis, "h3"),
        ] {
            store
                .put(CacheEntry::new(
                    1,
                    kind,
                    hash,
                    None,
                    json!({}),
                    chrono::Duration::hours(1),
                ))
                .await
                .unwrap();
        }

        let removed = store
            .remove(1, Some(RequestKind::Enhance), None)
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let removed = store.remove(1, None, None).await.unwrap();
        assert_eq!(removed, 1);
    }
}
