//! OpenAI embedding gateway

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use siq_core::{truncate_for_embedding, EmbeddingClient, Error, Result, EMBEDDING_DIM};

use crate::config::ProviderCredentials;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Embedding gateway backed by the OpenAI embeddings endpoint.
///
/// Inputs longer than the embedding budget are truncated, never rejected.
pub struct OpenAiEmbeddings {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

impl OpenAiEmbeddings {
    /// Create a new embedding gateway from credentials
    pub fn new(credentials: &ProviderCredentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: credentials.api_key.clone(),
            base_url: credentials
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: credentials
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    async fn request_embeddings(&self, inputs: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        let expected = inputs.len();
        let request_body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
            dimensions: EMBEDDING_DIM,
        };

        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Embedding(format!(
                "Embedding request failed with status {}: {}",
                status, error_text
            )));
        }

        let data: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))?;

        if data.data.len() != expected {
            return Err(Error::Embedding(format!(
                "Expected {} embeddings, got {}",
                expected,
                data.data.len()
            )));
        }

        // The API may return rows out of order; restore input order.
        let mut rows = data.data;
        rows.sort_by_key(|row| row.index);
        Ok(rows.into_iter().map(|row| row.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .request_embeddings(vec![truncate_for_embedding(text)])
            .await?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs = texts
            .iter()
            .map(|t| truncate_for_embedding(t))
            .collect::<Vec<_>>();
        self.request_embeddings(inputs).await
    }
}
