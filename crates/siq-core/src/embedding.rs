//! Embedding gateway trait

use async_trait::async_trait;

use crate::Result;

/// Maximum characters submitted per embedding input. Longer texts are
/// truncated rather than rejected.
pub const MAX_EMBED_CHARS: usize = 8_000;

/// Truncate text to the embedding input budget on a char boundary.
pub fn truncate_for_embedding(text: &str) -> &str {
    match text.char_indices().nth(MAX_EMBED_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Trait for external text-embedding services.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a single text into a fixed-dimensionality vector
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts in one call, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
