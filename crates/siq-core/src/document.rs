//! Persisted document and cache-entry shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RequestKind;

/// Fixed embedding dimensionality, platform-wide.
pub const EMBEDDING_DIM: usize = 1536;

/// Category of an embedded reference document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    SupplierProfile,
    Contract,
    Policy,
    BestPractice,
    HistoricalInsight,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::SupplierProfile => "supplier_profile",
            DocumentType::Contract => "contract",
            DocumentType::Policy => "policy",
            DocumentType::BestPractice => "best_practice",
            DocumentType::HistoricalInsight => "historical_insight",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An embedded reference document owned by the Document Store.
///
/// Invariant: at most one active document per (organization, source_model,
/// source_id) for auto-ingested documents. Manually authored documents
/// carry no source identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedDocument {
    pub id: i64,
    pub org_id: i64,
    pub document_type: DocumentType,
    pub title: String,
    pub content: String,
    /// Absent when embedding failed or has not run yet; such documents
    /// stay keyword-searchable only.
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
    /// Source record identity for auto-ingested documents
    pub source_model: Option<String>,
    pub source_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmbeddedDocument {
    /// Build a new document; the store assigns the id on insert.
    pub fn new(
        org_id: i64,
        document_type: DocumentType,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            org_id,
            document_type,
            title: title.into(),
            content: content.into(),
            embedding: None,
            metadata: serde_json::Value::Object(Default::default()),
            source_model: None,
            source_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_source(mut self, source_model: impl Into<String>, source_id: i64) -> Self {
        self.source_model = Some(source_model.into());
        self.source_id = Some(source_id);
        self
    }
}

/// A cached insight response owned by the Semantic Cache.
///
/// Unique by (organization, request kind, query hash). Entries past their
/// expiry are invisible to lookups even before physical deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: i64,
    pub org_id: i64,
    pub request_kind: RequestKind,
    pub query_hash: String,
    pub query_embedding: Option<Vec<f32>>,
    pub response: serde_json::Value,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        org_id: i64,
        request_kind: RequestKind,
        query_hash: impl Into<String>,
        query_embedding: Option<Vec<f32>>,
        response: serde_json::Value,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            org_id,
            request_kind,
            query_hash: query_hash.into(),
            query_embedding,
            response,
            hit_count: 0,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
