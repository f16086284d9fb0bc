//! Text-generation clients used for section classification and review writing.
//!
//! Both adapters issue plain HTTP requests with a shared `reqwest::Client`; callers decide how
//! to recover from failures.

mod ollama;
mod openai;

use crate::config::{CompletionProvider, CompletionSettings};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use ollama::OllamaCompletionClient;
pub use openai::OpenAiCompletionClient;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionClientError {
    /// Provider was not configured or could not be reached.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed or carried no text.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by text-generation providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send `prompt` as a single user turn and return the generated text.
    async fn complete(&self, prompt: &str) -> Result<String, CompletionClientError>;
}

/// Build the completion client described by `settings`.
pub fn build_completion_client(
    settings: &CompletionSettings,
) -> Result<Arc<dyn CompletionClient>, CompletionClientError> {
    tracing::debug!(
        provider = ?settings.provider,
        model = %settings.model,
        temperature = settings.temperature,
        "Building completion client"
    );
    match settings.provider {
        CompletionProvider::OpenAI => Ok(Arc::new(OpenAiCompletionClient::new(settings)?)),
        CompletionProvider::Ollama => Ok(Arc::new(OllamaCompletionClient::new(settings)?)),
    }
}
