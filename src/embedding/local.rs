use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

const BATCH_SIZE: usize = 64;

/// In-process sentence-embedding model backed by fastembed.
///
/// The model is downloaded and loaded on first use, on a blocking thread.
pub struct LocalEmbeddingClient {
    model: EmbeddingModel,
    loaded: Arc<Mutex<Option<TextEmbedding>>>,
}

impl LocalEmbeddingClient {
    /// Resolve `model_name` to a supported fastembed model.
    pub fn new(model_name: &str) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            model: resolve_model(model_name)?,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

fn resolve_model(name: &str) -> Result<EmbeddingModel, EmbeddingClientError> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        other => Err(EmbeddingClientError::ProviderUnavailable(format!(
            "unknown local embedding model '{other}' (supported: all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5)"
        ))),
    }
}

#[async_trait]
impl EmbeddingClient for LocalEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        let loaded = Arc::clone(&self.loaded);

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded.lock().map_err(|_| {
                EmbeddingClientError::ProviderUnavailable("local embedding model lock poisoned".into())
            })?;
            if guard.is_none() {
                tracing::info!(model = ?model, "Loading local embedding model");
                let instance = TextEmbedding::try_new(InitOptions::new(model)).map_err(|error| {
                    EmbeddingClientError::ProviderUnavailable(format!(
                        "failed to initialize local embedding model: {error}"
                    ))
                })?;
                *guard = Some(instance);
            }
            let Some(instance) = guard.as_mut() else {
                return Err(EmbeddingClientError::ProviderUnavailable(
                    "local embedding model not loaded".into(),
                ));
            };
            instance
                .embed(texts, Some(BATCH_SIZE))
                .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))
        })
        .await
        .map_err(|error| EmbeddingClientError::GenerationFailed(format!("embedding task failed: {error}")))?
    }
}
