//! Retrieval service
//!
//! Finds the documents most relevant to a free-text query for one
//! organization. The vector path needs both an index and an embedding
//! gateway; anything less, or any primary-path error, degrades to
//! case-insensitive keyword search. Finding nothing is an empty list,
//! never an error.

use std::sync::Arc;
use tracing::{debug, warn};

use siq_core::{DocumentStore, DocumentType, EmbeddedDocument, EmbeddingClient, Result};

/// Minimum similarity for a vector-search hit.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.70;

/// Default number of documents returned.
pub const DEFAULT_TOP_K: usize = 5;

/// Maximum excerpt length merged into augmented context.
pub const EXCERPT_MAX_CHARS: usize = 500;

/// Similarity reported for keyword matches, signaling "relevance
/// unverified".
const KEYWORD_PLACEHOLDER_SIMILARITY: f32 = 0.5;

/// How many significant query tokens the keyword fallback considers.
const KEYWORD_TOKEN_LIMIT: usize = 5;

/// Reserved key under which retrieved documents are merged into a
/// caller-supplied context object.
pub const CONTEXT_KEY: &str = "retrieved_context";

/// A retrieved document with its normalized similarity score.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub document: EmbeddedDocument,
    pub similarity: f32,
}

/// Retrieval-augmented generation service over the document store.
pub struct RetrievalService {
    store: Arc<dyn DocumentStore>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    similarity_threshold: f32,
    top_k: usize,
}

impl RetrievalService {
    pub fn new(store: Arc<dyn DocumentStore>, embedder: Option<Arc<dyn EmbeddingClient>>) -> Self {
        Self {
            store,
            embedder,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Retrieve the most relevant active documents for a query.
    pub async fn retrieve(
        &self,
        org_id: i64,
        query: &str,
        types: Option<&[DocumentType]>,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievedDocument>> {
        let k = top_k.unwrap_or(self.top_k);

        if let Some(embedder) = &self.embedder {
            if self.store.has_vector_index() {
                match self.vector_retrieve(org_id, query, types, k, embedder).await {
                    Ok(hits) => return Ok(hits),
                    Err(e) => {
                        warn!(error = %e, "Vector retrieval failed, falling back to keyword search");
                    }
                }
            }
        }

        self.keyword_retrieve(org_id, query, types, k).await
    }

    async fn vector_retrieve(
        &self,
        org_id: i64,
        query: &str,
        types: Option<&[DocumentType]>,
        top_k: usize,
        embedder: &Arc<dyn EmbeddingClient>,
    ) -> Result<Vec<RetrievedDocument>> {
        let vector = embedder.embed(query).await?;
        let hits = self
            .store
            .search_by_vector(org_id, &vector, types, top_k)
            .await?;

        Ok(hits
            .into_iter()
            .filter(|hit| hit.similarity >= self.similarity_threshold)
            .map(|hit| RetrievedDocument {
                document: hit.document,
                similarity: hit.similarity.clamp(0.0, 1.0),
            })
            .collect())
    }

    async fn keyword_retrieve(
        &self,
        org_id: i64,
        query: &str,
        types: Option<&[DocumentType]>,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        let tokens = significant_tokens(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        debug!(tokens = ?tokens, "Keyword retrieval");

        let candidates = self.store.find_active(org_id, types).await?;
        let matches = candidates
            .into_iter()
            .filter(|doc| {
                let title = doc.title.to_lowercase();
                let content = doc.content.to_lowercase();
                tokens
                    .iter()
                    .any(|t| title.contains(t.as_str()) || content.contains(t.as_str()))
            })
            .take(top_k)
            .map(|document| RetrievedDocument {
                document,
                similarity: KEYWORD_PLACEHOLDER_SIMILARITY,
            })
            .collect();

        Ok(matches)
    }

    /// Merge retrieved documents into a caller-supplied context object
    /// under the reserved key. Non-object contexts are left untouched.
    pub fn augment_context(&self, context: &mut serde_json::Value, docs: &[RetrievedDocument]) {
        let Some(map) = context.as_object_mut() else {
            return;
        };

        let entries: Vec<serde_json::Value> = docs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "document_type": d.document.document_type.as_str(),
                    "title": d.document.title,
                    "excerpt": truncate_chars(&d.document.content, EXCERPT_MAX_CHARS),
                    "relevance": format!("{:.0}%", f64::from(d.similarity) * 100.0),
                })
            })
            .collect();

        map.insert(CONTEXT_KEY.to_string(), serde_json::Value::Array(entries));
    }

    /// Documents describing one supplier, matched by metadata rather than
    /// similarity.
    pub async fn supplier_context(
        &self,
        org_id: i64,
        supplier_id: i64,
    ) -> Result<Vec<EmbeddedDocument>> {
        self.store
            .find_by_metadata(org_id, "supplier_id", &serde_json::json!(supplier_id))
            .await
    }

    /// Documents describing one spend category, matched by metadata.
    pub async fn category_context(
        &self,
        org_id: i64,
        category_id: i64,
    ) -> Result<Vec<EmbeddedDocument>> {
        self.store
            .find_by_metadata(org_id, "category_id", &serde_json::json!(category_id))
            .await
    }

    /// The most recently updated historical insight documents.
    pub async fn historical_insights(
        &self,
        org_id: i64,
        limit: usize,
    ) -> Result<Vec<EmbeddedDocument>> {
        let mut docs = self
            .store
            .find_active(org_id, Some(&[DocumentType::HistoricalInsight]))
            .await?;
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        docs.truncate(limit);
        Ok(docs)
    }
}

/// First few lowercase query tokens longer than two characters.
fn significant_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .take(KEYWORD_TOKEN_LIMIT)
        .map(|w| w.to_string())
        .collect()
}

/// Truncate text on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use async_trait::async_trait;
    use siq_core::{DocumentStore as _, EmbeddedDocument, Error};

    /// Embedder returning a fixed vector for every input.
    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.vector.clone())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![self.vector.clone(); texts.len()])
        }
    }

    /// Embedder that always fails.
    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingClient for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("embedding service down".to_string()))
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding("embedding service down".to_string()))
        }
    }

    async fn seed_store(store: &InMemoryDocumentStore) {
        let on_topic = EmbeddedDocument::new(
            1,
            DocumentType::Policy,
            "Procurement policy",
            "All purchases above $10,000 require competitive bids from suppliers.",
        )
        .with_embedding(Some(vec![1.0, 0.0]));

        let off_topic = EmbeddedDocument::new(
            1,
            DocumentType::Contract,
            "Office lease",
            "Lease agreement for the Berlin office.",
        )
        .with_embedding(Some(vec![0.0, 1.0]));

        store.insert(on_topic).await.unwrap();
        store.insert(off_topic).await.unwrap();
    }

    #[tokio::test]
    async fn test_vector_path_applies_threshold() {
        let store = Arc::new(InMemoryDocumentStore::new());
        seed_store(&store).await;

        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
        });
        let service = RetrievalService::new(store, Some(embedder));

        let hits = service
            .retrieve(1, "supplier bidding policy", None, None)
            .await
            .unwrap();
        // The orthogonal document scores 0.0 and falls below 0.70
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.title, "Procurement policy");
        assert!(hits[0].similarity >= DEFAULT_SIMILARITY_THRESHOLD);
    }

    #[tokio::test]
    async fn test_no_matches_is_empty_not_error() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
        });
        let service = RetrievalService::new(store, Some(embedder));

        let hits = service.retrieve(1, "anything at all", None, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_fallback_without_index() {
        let store = Arc::new(InMemoryDocumentStore::new().with_vector_index(false));
        seed_store(&store).await;

        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
        });
        let service = RetrievalService::new(store, Some(embedder));

        let hits = service
            .retrieve(1, "competitive bids", None, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].similarity, 0.5);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_keyword() {
        let store = Arc::new(InMemoryDocumentStore::new());
        seed_store(&store).await;

        let service = RetrievalService::new(store, Some(Arc::new(BrokenEmbedder)));

        let hits = service.retrieve(1, "lease Berlin", None, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.title, "Office lease");
        assert_eq!(hits[0].similarity, 0.5);
    }

    #[tokio::test]
    async fn test_keyword_ignores_short_tokens() {
        let store = Arc::new(InMemoryDocumentStore::new().with_vector_index(false));
        seed_store(&store).await;

        let service = RetrievalService::new(store, None);

        // Every token is two chars or fewer, so nothing matches
        let hits = service.retrieve(1, "a an of to", None, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_augment_context() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let service = RetrievalService::new(store, None);

        let long_content = "x".repeat(EXCERPT_MAX_CHARS + 100);
        let docs = vec![RetrievedDocument {
            document: EmbeddedDocument::new(1, DocumentType::BestPractice, "Bundling", long_content),
            similarity: 0.87,
        }];

        let mut context = serde_json::json!({"stats": {"total_spend": 1_000_000}});
        service.augment_context(&mut context, &docs);

        let merged = &context[CONTEXT_KEY][0];
        assert_eq!(merged["title"], "Bundling");
        assert_eq!(merged["relevance"], "87%");
        assert_eq!(
            merged["excerpt"].as_str().unwrap().chars().count(),
            EXCERPT_MAX_CHARS
        );
        // Pre-existing keys survive the merge
        assert_eq!(context["stats"]["total_spend"], 1_000_000);
    }

    #[tokio::test]
    async fn test_targeted_lookups() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let profile = EmbeddedDocument::new(1, DocumentType::SupplierProfile, "Acme", "profile")
            .with_metadata(serde_json::json!({"supplier_id": 9}));
        let insight = EmbeddedDocument::new(1, DocumentType::HistoricalInsight, "Past win", "saved 10%");
        store.insert(profile).await.unwrap();
        store.insert(insight).await.unwrap();

        let service = RetrievalService::new(store, None);

        let supplier_docs = service.supplier_context(1, 9).await.unwrap();
        assert_eq!(supplier_docs.len(), 1);
        assert_eq!(supplier_docs[0].title, "Acme");

        let history = service.historical_insights(1, 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].title, "Past win");
    }
}
