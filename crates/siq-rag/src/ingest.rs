//! Document ingestion pipeline
//!
//! Keeps the document store aligned with the supplier registry and the
//! historical outcome feedback, plus free-form manually authored
//! documents. Structured sources are summarized, embedded in fixed-size
//! batches, and upserted by (organization, source model, source id).
//! Batches run sequentially to keep third-party rate limits predictable.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use siq_core::{
    DocumentStore, DocumentType, EmbeddedDocument, EmbeddingClient, Result,
};

/// Documents embedded per batch call.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Source model name for supplier-derived documents.
pub const SUPPLIER_SOURCE: &str = "supplier";

/// Source model name for outcome-feedback-derived documents.
pub const FEEDBACK_SOURCE: &str = "outcome_feedback";

/// Aggregated spend statistics for one supplier, supplied by the
/// upstream registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierAggregate {
    pub id: i64,
    pub name: String,
    pub total_spend: f64,
    pub transaction_count: u64,
    pub average_transaction: f64,
    pub top_categories: Vec<String>,
}

/// Outcome feedback for one previously surfaced insight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeFeedback {
    pub id: i64,
    pub insight_title: String,
    pub action_taken: String,
    pub predicted_savings: f64,
    pub actual_savings: Option<f64>,
    pub notes: Option<String>,
}

/// Read-only upstream collaborators the pipeline ingests from.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn supplier_aggregates(&self, org_id: i64) -> Result<Vec<SupplierAggregate>>;

    async fn outcome_feedback(&self, org_id: i64) -> Result<Vec<OutcomeFeedback>>;

    /// Whether the supplier record still exists (orphan cleanup)
    async fn supplier_exists(&self, org_id: i64, supplier_id: i64) -> Result<bool>;

    /// Whether the feedback record still exists (orphan cleanup)
    async fn feedback_exists(&self, org_id: i64, feedback_id: i64) -> Result<bool>;
}

/// Accounting for one ingestion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub created: usize,
    pub updated: usize,
    /// Documents upserted without an embedding after a batch failure;
    /// keyword-searchable only until a future re-ingestion succeeds
    pub without_embedding: usize,
    pub errors: Vec<String>,
}

impl IngestReport {
    pub fn merge(&mut self, other: IngestReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.without_embedding += other.without_embedding;
        self.errors.extend(other.errors);
    }
}

/// Ingestion pipeline over a document store and source registry.
pub struct IngestionPipeline {
    store: Arc<dyn DocumentStore>,
    registry: Arc<dyn SourceRegistry>,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<dyn SourceRegistry>,
        embedder: Option<Arc<dyn EmbeddingClient>>,
    ) -> Self {
        Self {
            store,
            registry,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Re-ingest supplier profiles from the registry.
    pub async fn ingest_suppliers(&self, org_id: i64) -> Result<IngestReport> {
        let records = self.registry.supplier_aggregates(org_id).await?;
        let mut report = IngestReport::default();

        for chunk in records.chunks(self.batch_size) {
            let summaries: Vec<String> = chunk.iter().map(summarize_supplier).collect();
            let embeddings = self.embed_batch(&summaries, &mut report).await;

            for (record, embedding) in chunk.iter().zip(embeddings) {
                let metadata = serde_json::json!({
                    "supplier_id": record.id,
                    "supplier_name": record.name,
                    "total_spend": record.total_spend,
                });
                let upsert = self
                    .upsert_document(
                        org_id,
                        SUPPLIER_SOURCE,
                        record.id,
                        DocumentType::SupplierProfile,
                        format!("Supplier profile: {}", record.name),
                        summarize_supplier(record),
                        metadata,
                        embedding,
                        &mut report,
                    )
                    .await;
                if let Err(e) = upsert {
                    report
                        .errors
                        .push(format!("Supplier {}: {}", record.id, e));
                }
            }
        }

        info!(
            org_id,
            created = report.created,
            updated = report.updated,
            "Supplier ingestion complete"
        );
        Ok(report)
    }

    /// Re-ingest historical outcome feedback from the registry.
    pub async fn ingest_feedback(&self, org_id: i64) -> Result<IngestReport> {
        let records = self.registry.outcome_feedback(org_id).await?;
        let mut report = IngestReport::default();

        for chunk in records.chunks(self.batch_size) {
            let summaries: Vec<String> = chunk.iter().map(summarize_feedback).collect();
            let embeddings = self.embed_batch(&summaries, &mut report).await;

            for (record, embedding) in chunk.iter().zip(embeddings) {
                let metadata = serde_json::json!({
                    "feedback_id": record.id,
                    "predicted_savings": record.predicted_savings,
                    "actual_savings": record.actual_savings,
                });
                let upsert = self
                    .upsert_document(
                        org_id,
                        FEEDBACK_SOURCE,
                        record.id,
                        DocumentType::HistoricalInsight,
                        record.insight_title.clone(),
                        summarize_feedback(record),
                        metadata,
                        embedding,
                        &mut report,
                    )
                    .await;
                if let Err(e) = upsert {
                    report
                        .errors
                        .push(format!("Feedback {}: {}", record.id, e));
                }
            }
        }

        info!(
            org_id,
            created = report.created,
            updated = report.updated,
            "Feedback ingestion complete"
        );
        Ok(report)
    }

    /// Ingest one manually authored document. A single synchronous embed,
    /// no batching; authors expect immediate availability.
    pub async fn ingest_manual(
        &self,
        org_id: i64,
        document_type: DocumentType,
        title: impl Into<String>,
        content: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<i64> {
        let content = content.into();
        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&content).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "Embedding failed for manual document, storing without");
                    None
                }
            },
            None => None,
        };

        let document = EmbeddedDocument::new(org_id, document_type, title, content)
            .with_metadata(metadata)
            .with_embedding(embedding);
        self.store.insert(document).await
    }

    /// Delete auto-ingested documents whose source record no longer
    /// exists. Returns the count removed.
    pub async fn cleanup_orphans(&self, org_id: i64) -> Result<u64> {
        let mut removed = 0u64;

        for doc in self.store.list_sourced(org_id, SUPPLIER_SOURCE).await? {
            if let Some(source_id) = doc.source_id {
                if !self.registry.supplier_exists(org_id, source_id).await? {
                    self.store.delete(doc.id).await?;
                    removed += 1;
                }
            }
        }
        for doc in self.store.list_sourced(org_id, FEEDBACK_SOURCE).await? {
            if let Some(source_id) = doc.source_id {
                if !self.registry.feedback_exists(org_id, source_id).await? {
                    self.store.delete(doc.id).await?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(org_id, removed, "Orphaned documents removed");
        }
        Ok(removed)
    }

    /// Re-run structured ingestion for both source domains. Manual
    /// documents are untouched.
    pub async fn refresh_all(&self, org_id: i64) -> Result<IngestReport> {
        let mut report = self.ingest_suppliers(org_id).await?;
        report.merge(self.ingest_feedback(org_id).await?);
        Ok(report)
    }

    /// Embed one batch of summaries. A failed batch degrades to no
    /// embeddings for its documents rather than failing the run.
    async fn embed_batch(
        &self,
        summaries: &[String],
        report: &mut IngestReport,
    ) -> Vec<Option<Vec<f32>>> {
        match &self.embedder {
            Some(embedder) => match embedder.embed_batch(summaries).await {
                Ok(vectors) => vectors.into_iter().map(Some).collect(),
                Err(e) => {
                    warn!(error = %e, "Batch embedding failed, upserting without embeddings");
                    report
                        .errors
                        .push(format!("Batch embedding failed: {}", e));
                    vec![None; summaries.len()]
                }
            },
            None => vec![None; summaries.len()],
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upsert_document(
        &self,
        org_id: i64,
        source_model: &str,
        source_id: i64,
        document_type: DocumentType,
        title: String,
        content: String,
        metadata: serde_json::Value,
        embedding: Option<Vec<f32>>,
        report: &mut IngestReport,
    ) -> Result<()> {
        if embedding.is_none() {
            report.without_embedding += 1;
        }

        match self
            .store
            .find_by_source(org_id, source_model, source_id)
            .await?
        {
            Some(mut existing) => {
                existing.title = title;
                existing.content = content;
                existing.metadata = metadata;
                // Keep a previously stored embedding when this run failed
                // to produce one
                if embedding.is_some() {
                    existing.embedding = embedding;
                }
                existing.updated_at = Utc::now();
                self.store.update(existing).await?;
                report.updated += 1;
            }
            None => {
                let document = EmbeddedDocument::new(org_id, document_type, title, content)
                    .with_source(source_model, source_id)
                    .with_metadata(metadata)
                    .with_embedding(embedding);
                self.store.insert(document).await?;
                report.created += 1;
            }
        }
        Ok(())
    }
}

/// Canonical text summary of a supplier's aggregated spend.
fn summarize_supplier(record: &SupplierAggregate) -> String {
    let categories = if record.top_categories.is_empty() {
        "uncategorized spend".to_string()
    } else {
        record.top_categories.join(", ")
    };
    format!(
        "Supplier {}: total spend ${:.2} across {} transactions (average ${:.2}). Main categories: {}.",
        record.name,
        record.total_spend,
        record.transaction_count,
        record.average_transaction,
        categories,
    )
}

/// Canonical outcome narrative for one piece of feedback.
fn summarize_feedback(record: &OutcomeFeedback) -> String {
    let outcome = match record.actual_savings {
        Some(actual) => format!(
            "predicted savings ${:.2}, actual savings ${:.2}",
            record.predicted_savings, actual
        ),
        None => format!(
            "predicted savings ${:.2}, outcome not yet measured",
            record.predicted_savings
        ),
    };
    let notes = record.notes.as_deref().unwrap_or("no further notes");
    format!(
        "Insight \"{}\": action taken: {}. Outcome: {}. Notes: {}.",
        record.insight_title, record.action_taken, outcome, notes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticRegistry {
        suppliers: Vec<SupplierAggregate>,
        feedback: Vec<OutcomeFeedback>,
    }

    #[async_trait]
    impl SourceRegistry for StaticRegistry {
        async fn supplier_aggregates(&self, _org_id: i64) -> Result<Vec<SupplierAggregate>> {
            Ok(self.suppliers.clone())
        }

        async fn outcome_feedback(&self, _org_id: i64) -> Result<Vec<OutcomeFeedback>> {
            Ok(self.feedback.clone())
        }

        async fn supplier_exists(&self, _org_id: i64, supplier_id: i64) -> Result<bool> {
            Ok(self.suppliers.iter().any(|s| s.id == supplier_id))
        }

        async fn feedback_exists(&self, _org_id: i64, feedback_id: i64) -> Result<bool> {
            Ok(self.feedback.iter().any(|f| f.id == feedback_id))
        }
    }

    /// Embedder that can be scripted to fail on selected batch calls.
    struct FlakyEmbedder {
        batch_calls: AtomicUsize,
        fail_batches: Mutex<Vec<usize>>,
    }

    impl FlakyEmbedder {
        fn reliable() -> Arc<Self> {
            Arc::new(Self {
                batch_calls: AtomicUsize::new(0),
                fail_batches: Mutex::new(Vec::new()),
            })
        }

        fn failing_on(batches: Vec<usize>) -> Arc<Self> {
            Arc::new(Self {
                batch_calls: AtomicUsize::new(0),
                fail_batches: Mutex::new(batches),
            })
        }
    }

    #[async_trait]
    impl EmbeddingClient for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches.lock().unwrap().contains(&call) {
                return Err(siq_core::Error::Embedding("rate limited".to_string()));
            }
            Ok(vec![vec![0.1, 0.2]; texts.len()])
        }
    }

    fn supplier(id: i64, name: &str) -> SupplierAggregate {
        SupplierAggregate {
            id,
            name: name.to_string(),
            total_spend: 50_000.0,
            transaction_count: 10,
            average_transaction: 5_000.0,
            top_categories: vec!["IT".to_string()],
        }
    }

    fn feedback(id: i64) -> OutcomeFeedback {
        OutcomeFeedback {
            id,
            insight_title: format!("Consolidate vendor {}", id),
            action_taken: "Renegotiated contract".to_string(),
            predicted_savings: 12_000.0,
            actual_savings: Some(9_500.0),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_supplier_ingestion_is_idempotent() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(StaticRegistry {
            suppliers: vec![supplier(1, "Acme"), supplier(2, "Globex")],
            feedback: vec![],
        });
        let pipeline =
            IngestionPipeline::new(store.clone(), registry, Some(FlakyEmbedder::reliable()));

        let first = pipeline.ingest_suppliers(1).await.unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.updated, 0);

        // Unchanged source data: second run creates nothing new
        let second = pipeline.ingest_suppliers(1).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);

        let docs = store.find_active(1, None).await.unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_failure_upserts_without_embedding() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(StaticRegistry {
            suppliers: vec![supplier(1, "Acme"), supplier(2, "Globex"), supplier(3, "Initech")],
            feedback: vec![],
        });
        // batch size 2 → two batches; the first fails
        let pipeline = IngestionPipeline::new(
            store.clone(),
            registry,
            Some(FlakyEmbedder::failing_on(vec![0])),
        )
        .with_batch_size(2);

        let report = pipeline.ingest_suppliers(1).await.unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(report.without_embedding, 2);
        assert_eq!(report.errors.len(), 1);

        let docs = store.find_active(1, None).await.unwrap();
        let embedded = docs.iter().filter(|d| d.embedding.is_some()).count();
        assert_eq!(embedded, 1);
    }

    #[tokio::test]
    async fn test_feedback_ingestion_and_refresh_all() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(StaticRegistry {
            suppliers: vec![supplier(1, "Acme")],
            feedback: vec![feedback(10), feedback(11)],
        });
        let pipeline =
            IngestionPipeline::new(store.clone(), registry, Some(FlakyEmbedder::reliable()));

        let report = pipeline.refresh_all(1).await.unwrap();
        assert_eq!(report.created, 3);

        let insights = store
            .find_active(1, Some(&[DocumentType::HistoricalInsight]))
            .await
            .unwrap();
        assert_eq!(insights.len(), 2);
        assert!(insights[0].content.contains("Renegotiated contract"));
    }

    #[tokio::test]
    async fn test_manual_ingestion_has_no_source_identity() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(StaticRegistry {
            suppliers: vec![],
            feedback: vec![],
        });
        let pipeline =
            IngestionPipeline::new(store.clone(), registry, Some(FlakyEmbedder::reliable()));

        let id = pipeline
            .ingest_manual(
                1,
                DocumentType::Policy,
                "Travel policy",
                "Economy class only below 6 hours.",
                serde_json::json!({"category": "travel"}),
            )
            .await
            .unwrap();

        let docs = store.find_active(1, None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert!(docs[0].source_model.is_none());
        assert!(docs[0].embedding.is_some());
    }

    #[tokio::test]
    async fn test_orphan_cleanup() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let registry = Arc::new(StaticRegistry {
            suppliers: vec![supplier(1, "Acme"), supplier(2, "Globex")],
            feedback: vec![],
        });
        let pipeline =
            IngestionPipeline::new(store.clone(), registry, Some(FlakyEmbedder::reliable()));
        pipeline.ingest_suppliers(1).await.unwrap();

        // Supplier 2 disappears from the registry
        let shrunk = Arc::new(StaticRegistry {
            suppliers: vec![supplier(1, "Acme")],
            feedback: vec![],
        });
        let pipeline = IngestionPipeline::new(store.clone(), shrunk, None);

        let removed = pipeline.cleanup_orphans(1).await.unwrap();
        assert_eq!(removed, 1);

        let docs = store.find_active(1, None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_id, Some(1));
    }
}
