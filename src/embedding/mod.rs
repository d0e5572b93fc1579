//! Embedding generation for passages and queries.

mod hashing;
mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAIEmbedder;

use crate::config::{EmbeddingProvider, EmbeddingSettings};
use crate::error::Result;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single query.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple passages, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimensions.
    fn dimensions(&self) -> usize;
}

/// Create the configured embedder.
pub fn create_embedder(
    settings: &EmbeddingSettings,
    retry: RetryPolicy,
) -> Result<Arc<dyn Embedder>> {
    match settings.provider {
        EmbeddingProvider::OpenAI => Ok(Arc::new(OpenAIEmbedder::from_settings(settings, retry)?)),
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(
            settings.dimensions as usize,
        ))),
    }
}
