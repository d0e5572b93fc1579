//! OpenAI embeddings implementation.

use super::Embedder;
use crate::config::EmbeddingSettings;
use crate::error::{Result, StudyError};
use crate::openai::{classify_error, create_client_with_timeout, Endpoint};
use crate::retry::RetryPolicy;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Inputs per request accepted by the embeddings endpoint.
const PROVIDER_BATCH_LIMIT: usize = 2048;

/// OpenAI-based embedder.
pub struct OpenAIEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimensions: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn from_settings(settings: &EmbeddingSettings, retry: RetryPolicy) -> Result<Self> {
        let endpoint = Endpoint {
            api_base: settings.api_base.clone(),
            api_key_env: Some(settings.api_key_env.clone()),
        };
        Ok(Self {
            client: create_client_with_timeout(&endpoint, retry.call_timeout)?,
            model: settings.model.clone(),
            dimensions: settings.dimensions as usize,
            batch_size: settings.batch_size.clamp(1, PROVIDER_BATCH_LIMIT),
            retry,
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(EmbeddingInput::StringArray(input.to_vec()))
            .dimensions(self.dimensions as u32)
            .build()
            .map_err(|e| StudyError::Embedding(format!("Failed to build request: {}", e)))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| classify_error(e, StudyError::Embedding))?;

        // Sort by index to ensure correct order
        let mut data = response.data;
        data.sort_by_key(|e| e.index);

        if data.len() != input.len() {
            return Err(StudyError::Embedding(format!(
                "Expected {} embeddings, got {}",
                input.len(),
                data.len()
            )));
        }
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[instrument(skip(self, text))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| StudyError::Embedding("Empty embedding response".to_string()))
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let vectors = self
                .retry
                .run("embedding request", || self.request(chunk))
                .await
                .map_err(|e| e.exhausted(StudyError::Embedding))?;
            all_embeddings.extend(vectors);
        }

        debug!("Generated {} embeddings", all_embeddings.len());
        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_creation() {
        let settings = EmbeddingSettings {
            api_base: Some("http://localhost:8080/v1".to_string()),
            ..EmbeddingSettings::default()
        };
        let embedder = OpenAIEmbedder::from_settings(&settings, RetryPolicy::default()).unwrap();
        assert_eq!(embedder.dimensions(), 1536);
        assert_eq!(embedder.batch_size, 64);

        let settings = EmbeddingSettings {
            model: "text-embedding-3-large".to_string(),
            dimensions: 3072,
            batch_size: 100_000,
            ..EmbeddingSettings::default()
        };
        let embedder = OpenAIEmbedder::from_settings(&settings, RetryPolicy::default()).unwrap();
        assert_eq!(embedder.dimensions(), 3072);
        assert_eq!(embedder.batch_size, PROVIDER_BATCH_LIMIT);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let embedder =
            OpenAIEmbedder::from_settings(&EmbeddingSettings::default(), RetryPolicy::default())
                .unwrap();
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }
}
