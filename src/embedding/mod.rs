//! Embedding client abstraction and provider adapters.

mod hashing;
#[cfg(feature = "local-embeddings")]
mod local;
mod ollama;
mod openai;

use crate::config::{EmbeddingProvider, EmbeddingSettings};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use hashing::HashingEmbeddingClient;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddingClient;
pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached or was not configured.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider answered with a payload we could not use.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        self.generate_embeddings(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingClientError::InvalidResponse("no embedding returned".into()))
    }
}

/// Build the embedding client described by `settings`.
pub fn build_embedding_client(
    settings: &EmbeddingSettings,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?settings.provider,
        model = %settings.model,
        dimension = settings.dimension,
        "Building embedding client"
    );
    match settings.provider {
        EmbeddingProvider::Hash => Ok(Arc::new(HashingEmbeddingClient::new(settings.dimension))),
        EmbeddingProvider::OpenAI => Ok(Arc::new(OpenAiEmbeddingClient::new(settings)?)),
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaEmbeddingClient::new(settings)?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Local => Ok(Arc::new(LocalEmbeddingClient::new(&settings.model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Local => Err(EmbeddingClientError::ProviderUnavailable(
            "the local provider requires building with --features local-embeddings".into(),
        )),
    }
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched, or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn embed_one_returns_the_single_vector() {
        let client = HashingEmbeddingClient::new(8);
        let vector = client.embed_one("aspirin").await.expect("embedding");
        assert_eq!(vector.len(), 8);
    }
}
