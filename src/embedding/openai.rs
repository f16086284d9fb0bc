use super::{EmbeddingClient, EmbeddingClientError};
use crate::config::EmbeddingSettings;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Embeddings client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: Option<usize>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    /// Build a client from settings; fails when no API key is configured.
    pub fn new(settings: &EmbeddingSettings) -> Result<Self, EmbeddingClientError> {
        let api_key = settings
            .openai_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| EmbeddingClientError::ProviderUnavailable("OPENAI_API_KEY is not set".into()))?;
        let http = Client::builder()
            .user_agent("sysreview/embeddings")
            .build()
            .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))?;

        // text-embedding-3 models accept a requested dimensionality; older ones reject the field.
        let dimensions = settings
            .model
            .starts_with("text-embedding-3")
            .then_some(settings.dimension);

        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", settings.openai_base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: &texts,
            dimensions: self.dimensions,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.endpoint
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode embeddings: {error}"))
        })?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "received {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        parsed.data.sort_by_key(|entry| entry.index);
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingProvider;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn settings(base_url: String) -> EmbeddingSettings {
        EmbeddingSettings {
            provider: EmbeddingProvider::OpenAI,
            model: "text-embedding-3-small".into(),
            dimension: 2,
            ollama_url: String::new(),
            openai_base_url: base_url,
            openai_api_key: Some("sk-test".into()),
        }
    }

    #[tokio::test]
    async fn returns_vectors_in_input_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embeddings")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(r#"{"model": "text-embedding-3-small", "dimensions": 2}"#);
                then.status(200).json_body(json!({
                    "data": [
                        { "index": 1, "embedding": [0.0, 1.0] },
                        { "index": 0, "embedding": [1.0, 0.0] }
                    ]
                }));
            })
            .await;

        let client = OpenAiEmbeddingClient::new(&settings(server.base_url())).expect("client");
        let vectors = client
            .generate_embeddings(vec!["first".into(), "second".into()])
            .await
            .expect("embeddings");

        mock.assert();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(429).body("slow down");
            })
            .await;

        let client = OpenAiEmbeddingClient::new(&settings(server.base_url())).expect("client");
        let error = client
            .generate_embeddings(vec!["text".into()])
            .await
            .expect_err("error");
        assert!(matches!(error, EmbeddingClientError::GenerationFailed(message) if message.contains("429")));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let mut settings = settings("http://localhost".into());
        settings.openai_api_key = None;
        assert!(OpenAiEmbeddingClient::new(&settings).is_err());
    }
}
