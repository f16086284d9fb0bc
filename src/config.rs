//! Environment-driven configuration.
//!
//! Configuration is loaded once at process start with [`load`] and handed to component
//! constructors by reference. Every setting has a documented default except the Qdrant URL
//! (when the Qdrant store is selected) and the OpenAI key (when an OpenAI provider is selected).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the review pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Vector index connection settings.
    pub store: StoreSettings,
    /// Embedding provider used for chunk and query vectors.
    pub embedding: EmbeddingSettings,
    /// Embedding provider used for semantic de-duplication of generated text. `None` when no
    /// semantic encoder is available, which disables the semantic pass.
    pub dedup_embedding: Option<EmbeddingSettings>,
    /// Text-generation provider used for classification and section writing.
    pub completion: CompletionSettings,
    /// Tunables for chunking, ingestion, retrieval, and generation.
    pub pipeline: PipelineSettings,
    /// Root directory holding one sub-directory of uploaded papers per session.
    pub uploads_dir: String,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Which vector index backs the pipeline.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreKind {
    /// Remote Qdrant instance.
    Qdrant,
    /// Process-local index, lost on exit.
    Memory,
}

/// Vector index settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Selected backend.
    pub kind: VectorStoreKind,
    /// Base URL of the Qdrant instance.
    pub qdrant_url: Option<String>,
    /// Collection holding every review namespace.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Deterministic byte-hashing vectors, for offline runs.
    Hash,
    /// In-process sentence-embedding model (requires the `local-embeddings` feature).
    Local,
}

/// Connection settings for one embedding provider.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    /// Provider selected for this role.
    pub provider: EmbeddingProvider,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Dimensionality of the produced vectors.
    pub dimension: usize,
    /// Base URL for the Ollama runtime.
    pub ollama_url: String,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// API key for OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
}

/// Supported text-generation backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    /// Hosted OpenAI chat completions API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
}

/// Connection settings for the text-generation provider.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    /// Provider used for completions.
    pub provider: CompletionProvider,
    /// Chat model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Base URL for the Ollama runtime.
    pub ollama_url: String,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// API key for OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
}

/// Unit in which chunk sizes and overlaps are measured.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// `cl100k_base` tokens.
    Tokens,
}

/// Pipeline tunables shared by the ingestion, retrieval, and generation stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Target chunk length.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Unit of `chunk_size` and `chunk_overlap`.
    pub chunk_unit: LengthUnit,
    /// Maximum chunks classified and upserted at once.
    pub ingest_concurrency: usize,
    /// Maximum per-paper queries in flight at once.
    pub retrieval_concurrency: usize,
    /// Number of describe-stats polls after an upsert batch.
    pub upsert_poll_retries: usize,
    /// Delay between describe-stats polls.
    pub upsert_poll_delay: Duration,
    /// Skip chunks whose `(paper, section)` namespace already holds vectors.
    pub skip_populated_sections: bool,
    /// Nearest neighbours requested per paper and section.
    pub retrieval_top_k: usize,
    /// Optional per-paper query timeout.
    pub retrieval_query_timeout: Option<Duration>,
    /// Maximum retrieved chunks placed in a section prompt.
    pub section_chunk_budget: usize,
    /// Mean similarity at or above which a generated line is dropped.
    pub similarity_threshold: f32,
    /// Characters kept from each earlier section when building continuity context.
    pub previous_section_char_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 300,
            chunk_unit: LengthUnit::Chars,
            ingest_concurrency: 8,
            retrieval_concurrency: 8,
            upsert_poll_retries: 10,
            upsert_poll_delay: Duration::from_secs(2),
            skip_populated_sections: true,
            retrieval_top_k: 50,
            retrieval_query_timeout: None,
            section_chunk_budget: 30,
            similarity_threshold: 0.8,
            previous_section_char_limit: 2000,
        }
    }
}

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let ollama_url = load_env_optional("OLLAMA_URL").unwrap_or_else(|| DEFAULT_OLLAMA_URL.into());
        let openai_base_url = load_env_optional("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.into());
        let openai_api_key = load_env_optional("OPENAI_API_KEY");

        let store = StoreSettings {
            kind: load_env_parsed("VECTOR_STORE", VectorStoreKind::Qdrant)?,
            qdrant_url: load_env_optional("QDRANT_URL"),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "systematic-review".into()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
        };
        if store.kind == VectorStoreKind::Qdrant && store.qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }

        let embedding = EmbeddingSettings {
            provider: load_env_parsed("EMBEDDING_PROVIDER", EmbeddingProvider::OpenAI)?,
            model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".into()),
            dimension: load_env_parsed("EMBEDDING_DIMENSION", 1536)?,
            ollama_url: ollama_url.clone(),
            openai_base_url: openai_base_url.clone(),
            openai_api_key: openai_api_key.clone(),
        };
        if embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }

        let dedup_provider = load_env_optional("DEDUP_EMBEDDING_PROVIDER")
            .map(|value| {
                value
                    .parse::<EmbeddingProvider>()
                    .map_err(|_| ConfigError::InvalidValue("DEDUP_EMBEDDING_PROVIDER".into()))
            })
            .transpose()?;
        let dedup_embedding =
            resolve_dedup_embedding(dedup_provider, load_env_optional("DEDUP_EMBEDDING_MODEL"), &embedding)?;

        let completion = CompletionSettings {
            provider: load_env_parsed("COMPLETION_PROVIDER", CompletionProvider::OpenAI)?,
            model: load_env_optional("COMPLETION_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".into()),
            temperature: load_env_parsed("COMPLETION_TEMPERATURE", 0.0)?,
            ollama_url,
            openai_base_url,
            openai_api_key,
        };

        let defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            chunk_size: load_env_parsed("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: load_env_parsed("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            chunk_unit: load_env_parsed("CHUNK_UNIT", defaults.chunk_unit)?,
            ingest_concurrency: load_env_parsed("INGEST_CONCURRENCY", defaults.ingest_concurrency)?
                .max(1),
            retrieval_concurrency: load_env_parsed(
                "RETRIEVAL_CONCURRENCY",
                defaults.retrieval_concurrency,
            )?
            .max(1),
            upsert_poll_retries: load_env_parsed("UPSERT_POLL_RETRIES", defaults.upsert_poll_retries)?,
            upsert_poll_delay: Duration::from_millis(load_env_parsed("UPSERT_POLL_DELAY_MS", 2000u64)?),
            skip_populated_sections: load_env_bool(
                "INGEST_SKIP_POPULATED_SECTIONS",
                defaults.skip_populated_sections,
            )?,
            retrieval_top_k: load_env_parsed("RETRIEVAL_TOP_K", defaults.retrieval_top_k)?.max(1),
            retrieval_query_timeout: load_env_optional("RETRIEVAL_QUERY_TIMEOUT_SECS")
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|_| ConfigError::InvalidValue("RETRIEVAL_QUERY_TIMEOUT_SECS".into()))
                })
                .transpose()?,
            section_chunk_budget: load_env_parsed("SECTION_CHUNK_BUDGET", defaults.section_chunk_budget)?,
            similarity_threshold: load_env_parsed(
                "DEDUP_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            previous_section_char_limit: load_env_parsed(
                "PREVIOUS_SECTION_CHAR_LIMIT",
                defaults.previous_section_char_limit,
            )?,
        };
        if pipeline.chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE".into()));
        }
        if pipeline.chunk_overlap >= pipeline.chunk_size {
            return Err(ConfigError::InvalidValue("CHUNK_OVERLAP".into()));
        }

        Ok(Self {
            store,
            embedding,
            dedup_embedding,
            completion,
            pipeline,
            uploads_dir: load_env_optional("UPLOADS_DIR").unwrap_or_else(|| "uploads".into()),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

fn default_dedup_provider(primary: EmbeddingProvider) -> EmbeddingProvider {
    if cfg!(feature = "local-embeddings") {
        EmbeddingProvider::Local
    } else {
        primary
    }
}

/// Pick the de-duplication encoder. Hashed vectors carry no meaning, so `hash` is rejected
/// when requested explicitly and disables the semantic pass when inherited from the primary
/// provider.
fn resolve_dedup_embedding(
    requested: Option<EmbeddingProvider>,
    model: Option<String>,
    primary: &EmbeddingSettings,
) -> Result<Option<EmbeddingSettings>, ConfigError> {
    let provider = match requested {
        Some(EmbeddingProvider::Hash) => {
            return Err(ConfigError::InvalidValue("DEDUP_EMBEDDING_PROVIDER".into()));
        }
        Some(provider) => provider,
        None => default_dedup_provider(primary.provider),
    };

    let settings = match provider {
        EmbeddingProvider::Hash => return Ok(None),
        EmbeddingProvider::Local => EmbeddingSettings {
            provider,
            model: model.unwrap_or_else(|| "all-minilm-l6-v2".into()),
            dimension: 384,
            ..primary.clone()
        },
        _ if provider == primary.provider && model.is_none() => primary.clone(),
        _ => EmbeddingSettings {
            provider,
            model: model.unwrap_or_else(|| primary.model.clone()),
            ..primary.clone()
        },
    };
    Ok(Some(settings))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match load_env_optional(key) {
        Some(value) => parse_bool(&value).ok_or_else(|| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
}

impl FromStr for CompletionProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for VectorStoreKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl FromStr for LengthUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chars" | "characters" => Ok(Self::Chars),
            "tokens" => Ok(Self::Tokens),
            _ => Err(()),
        }
    }
}

/// Load `.env`, then build the configuration from the process environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        store = ?config.store.kind,
        collection = %config.store.qdrant_collection_name,
        embedding_provider = ?config.embedding.provider,
        embedding_model = %config.embedding.model,
        dedup_provider = ?config.dedup_embedding.as_ref().map(|settings| settings.provider),
        completion_provider = ?config.completion.provider,
        completion_model = %config.completion.model,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(config)
}
