//! Insight pipeline facade
//!
//! Sequences one insight request through the full pipeline: semantic
//! cache lookup, retrieval-augmented prompt building, orchestrated
//! generation with failover, ground-truth validation, and write-back of
//! the confidence-adjusted payload into the cache.

use std::sync::Arc;
use tracing::{debug, info};

use siq_core::{
    ChatMessage, DocumentType, GenerationOutcome, OutputSchema, PromptPayload, RequestKind, Result,
    ValidationReport,
};
use siq_providers::InsightOrchestrator;
use siq_rag::{RetrievalService, SemanticCache};
use siq_validate::{OrgFacts, ResponseValidator};

/// One insight request, organization-scoped like every pipeline call.
#[derive(Debug, Clone)]
pub struct InsightRequest {
    pub query: String,
    pub kind: RequestKind,
    /// Restrict retrieval to these document types, when set
    pub document_types: Option<Vec<DocumentType>>,
    /// Precomputed context (dashboard statistics etc.) merged into the
    /// prompt alongside retrieved documents
    pub context: serde_json::Value,
    /// Schema the generated payload must honor
    pub schema: OutputSchema,
    /// Ground truth for validation
    pub facts: OrgFacts,
    /// Cache entry lifetime; the cache default applies when unset
    pub cache_ttl: Option<chrono::Duration>,
}

/// A completed insight, with provenance and the validation report.
/// Cache hits carry neither: the cached payload was already validated
/// when it was stored.
#[derive(Debug, Clone)]
pub struct InsightResponse {
    pub payload: serde_json::Value,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub report: Option<ValidationReport>,
    pub from_cache: bool,
}

/// Outcome of one pipeline run. `Unavailable` mirrors the orchestrator's
/// "no result" signal so callers can surface a 503-equivalent.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Completed(InsightResponse),
    Unavailable { last_error: Option<String> },
}

/// The assembled pipeline. Stateless across requests; all state lives in
/// the stores behind the services.
pub struct InsightPipeline {
    orchestrator: Arc<InsightOrchestrator>,
    retrieval: RetrievalService,
    cache: SemanticCache,
    validator: ResponseValidator,
}

impl InsightPipeline {
    pub fn new(
        orchestrator: Arc<InsightOrchestrator>,
        retrieval: RetrievalService,
        cache: SemanticCache,
    ) -> Self {
        Self {
            orchestrator,
            retrieval,
            cache,
            validator: ResponseValidator::new(),
        }
    }

    /// Run one insight request end to end.
    ///
    /// No internal deadline is applied; callers needing one wrap this
    /// future in `tokio::time::timeout`, which also cancels any failover
    /// still in flight.
    pub async fn generate(&self, org_id: i64, request: &InsightRequest) -> Result<PipelineOutcome> {
        if let Some(payload) = self
            .cache
            .lookup(org_id, &request.query, request.kind)
            .await?
        {
            debug!(org_id, kind = %request.kind, "Serving insight from cache");
            return Ok(PipelineOutcome::Completed(InsightResponse {
                payload,
                provider: None,
                model: None,
                report: None,
                from_cache: true,
            }));
        }

        let prompt = self.build_prompt(org_id, request).await?;

        let insight = match self.orchestrator.generate(&prompt, &request.schema).await? {
            GenerationOutcome::Generated(insight) => insight,
            GenerationOutcome::Unavailable { last_error } => {
                return Ok(PipelineOutcome::Unavailable { last_error });
            }
        };

        let report = self
            .validator
            .validate_response(&insight.payload, &request.facts);
        let payload = apply_validation(insight.payload, &report);

        info!(
            org_id,
            provider = %insight.provider,
            validated = report.validated,
            findings = report.findings.len(),
            "Insight generated"
        );

        self.cache
            .store(
                org_id,
                &request.query,
                payload.clone(),
                request.kind,
                request.cache_ttl,
            )
            .await?;

        Ok(PipelineOutcome::Completed(InsightResponse {
            payload,
            provider: Some(insight.provider),
            model: Some(insight.model),
            report: Some(report),
            from_cache: false,
        }))
    }

    /// Build the prompt: retrieved documents are merged into the caller's
    /// context object, which becomes part of the system prompt.
    async fn build_prompt(&self, org_id: i64, request: &InsightRequest) -> Result<PromptPayload> {
        let docs = self
            .retrieval
            .retrieve(
                org_id,
                &request.query,
                request.document_types.as_deref(),
                None,
            )
            .await?;

        let mut context = request.context.clone();
        self.retrieval.augment_context(&mut context, &docs);

        let system = format!(
            "You are a procurement analytics assistant. Ground every claim in \
             the provided organizational context.\n\nContext:\n{}",
            serde_json::to_string_pretty(&context)?,
        );

        Ok(PromptPayload {
            system: Some(system),
            messages: vec![ChatMessage::user(request.query.clone())],
            ..PromptPayload::default()
        })
    }
}

/// Replace the claimed confidence with the adjusted one and record the
/// validity flag on the payload before it is cached or returned.
fn apply_validation(
    mut payload: serde_json::Value,
    report: &ValidationReport,
) -> serde_json::Value {
    if let Some(map) = payload.as_object_mut() {
        map.insert(
            "confidence".to_string(),
            serde_json::json!(report.adjusted_confidence),
        );
        map.insert("validated".to_string(), serde_json::json!(report.validated));
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use siq_core::LlmBackend;
    use siq_rag::{InMemoryCacheStore, InMemoryDocumentStore};

    /// Backend returning a fixed payload and counting its calls.
    struct CountingBackend {
        payload: serde_json::Value,
        calls: AtomicUsize,
    }

    impl CountingBackend {
        fn new(payload: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                payload,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        fn model_id(&self) -> &str {
            "counting-1"
        }

        fn is_available(&self) -> bool {
            true
        }

        async fn generate_structured(
            &self,
            _payload: &PromptPayload,
            _schema: &OutputSchema,
        ) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    fn pipeline_with(backend: Arc<CountingBackend>) -> InsightPipeline {
        let orchestrator = Arc::new(InsightOrchestrator::new(
            "counting",
            vec![backend as Arc<dyn LlmBackend>],
            vec!["counting".to_string()],
            true,
        ));
        let documents = Arc::new(InMemoryDocumentStore::new().with_vector_index(false));
        let cache_store = Arc::new(InMemoryCacheStore::new().with_vector_index(false));
        InsightPipeline::new(
            orchestrator,
            RetrievalService::new(documents, None),
            SemanticCache::new(cache_store, None),
        )
    }

    fn request() -> InsightRequest {
        InsightRequest {
            query: "Where can we save on IT spend?".to_string(),
            kind: RequestKind::Enhance,
            document_types: None,
            context: json!({"total_spend": 1_000_000.0}),
            schema: OutputSchema::new("insights", "Spend insights", json!({"type": "object"})),
            facts: OrgFacts {
                org_id: 1,
                total_spend: 1_000_000.0,
                ..OrgFacts::default()
            },
            cache_ttl: None,
        }
    }

    #[tokio::test]
    async fn test_generated_payload_carries_adjusted_confidence() {
        let backend = CountingBackend::new(json!({
            "confidence": 0.9,
            "total_savings": 1_200_000.0,
        }));
        let pipeline = pipeline_with(backend);

        let outcome = pipeline.generate(1, &request()).await.unwrap();
        let PipelineOutcome::Completed(response) = outcome else {
            panic!("expected a completed insight");
        };

        assert!(!response.from_cache);
        assert_eq!(response.provider.as_deref(), Some("counting"));
        let report = response.report.unwrap();
        assert!(!report.validated);
        // One critical finding: 0.9 scaled by 0.70
        assert_eq!(response.payload["validated"], json!(false));
        let confidence = response.payload["confidence"].as_f64().unwrap();
        assert!((confidence - 0.9 * 0.70).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_generation() {
        let backend = CountingBackend::new(json!({"confidence": 0.9, "summary": "ok"}));
        let pipeline = pipeline_with(backend.clone());

        let first = pipeline.generate(1, &request()).await.unwrap();
        assert!(matches!(first, PipelineOutcome::Completed(ref r) if !r.from_cache));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Same normalized query: served from cache, backend untouched
        let second = pipeline.generate(1, &request()).await.unwrap();
        let PipelineOutcome::Completed(response) = second else {
            panic!("expected a completed insight");
        };
        assert!(response.from_cache);
        assert!(response.report.is_none());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // The cached payload is the validated one
        assert_eq!(response.payload["validated"], json!(true));
    }

    #[tokio::test]
    async fn test_unavailability_propagates_without_error() {
        struct FailingBackend;

        #[async_trait]
        impl LlmBackend for FailingBackend {
            fn name(&self) -> &str {
                "failing"
            }
            fn model_id(&self) -> &str {
                "failing-1"
            }
            fn is_available(&self) -> bool {
                true
            }
            async fn generate_structured(
                &self,
                _payload: &PromptPayload,
                _schema: &OutputSchema,
            ) -> Result<serde_json::Value> {
                Err(siq_core::Error::Provider("quota exhausted".to_string()))
            }
        }

        let orchestrator = Arc::new(InsightOrchestrator::new(
            "failing",
            vec![Arc::new(FailingBackend) as Arc<dyn LlmBackend>],
            vec!["failing".to_string()],
            true,
        ));
        let documents = Arc::new(InMemoryDocumentStore::new().with_vector_index(false));
        let cache_store = Arc::new(InMemoryCacheStore::new().with_vector_index(false));
        let pipeline = InsightPipeline::new(
            orchestrator,
            RetrievalService::new(documents, None),
            SemanticCache::new(cache_store, None),
        );

        let outcome = pipeline.generate(1, &request()).await.unwrap();
        let PipelineOutcome::Unavailable { last_error } = outcome else {
            panic!("expected unavailability");
        };
        assert!(last_error.unwrap().contains("quota exhausted"));
    }
}
