//! Service facade shared by the HTTP API and the CLI.

use crate::completion::build_completion_client;
use crate::config::{Config, VectorStoreKind};
use crate::embedding::build_embedding_client;
use crate::extract::{extract_text, is_supported};
use crate::history::{HistoryEntry, HistoryError, HistoryStore, MemoryHistoryStore, NewHistoryEntry};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::processing::{TextChunker, TextNormalizer};
use crate::review::dedupe::SemanticDeduplicator;
use crate::review::{
    IngestError, IngestReport, IngestionOptions, IngestionService, OrchestratorOptions, RetrievalService, Review,
    ReviewOrchestrator, SectionClassifier, SectionGenerator, StoredSectionPolicy,
};
use crate::store::{MemoryIndex, PaperId, QdrantIndex, VectorIndex};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ReviewServiceError {
    /// The request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The session id cannot name an upload directory.
    #[error("invalid session id: {0:?}")]
    InvalidSession(String),
    /// No upload directory exists for the session.
    #[error("no uploads found for session {0}")]
    SessionNotFound(String),
    /// The upload directory could not be listed.
    #[error("failed to read uploads: {0}")]
    Uploads(String),
    /// A paper could not be prepared for ingestion.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// The history store rejected the operation.
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Operations exposed to the HTTP layer.
#[async_trait]
pub trait ReviewApi: Send + Sync {
    /// Ingest every paper uploaded for `session_id`.
    async fn ingest_session(&self, session_id: &str) -> Result<Vec<IngestReport>, ReviewServiceError>;

    /// Generate a review for `prompt` over the session's papers.
    async fn generate(&self, session_id: &str, prompt: &str) -> Result<Review, ReviewServiceError>;

    /// Save a generated review.
    async fn save_review(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, ReviewServiceError>;

    /// Fetch a saved review.
    async fn get_review(&self, prompt_id: i64) -> Result<HistoryEntry, ReviewServiceError>;

    /// A user's saved reviews, newest first.
    async fn user_history(&self, user_id: i64) -> Result<Vec<HistoryEntry>, ReviewServiceError>;

    /// Delete a saved review.
    async fn delete_review(&self, prompt_id: i64) -> Result<(), ReviewServiceError>;

    /// Current pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// A paper file found in a session's upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaper {
    /// Identifier derived from the file stem.
    pub paper_id: PaperId,
    /// Location of the file.
    pub path: PathBuf,
}

/// Per-session upload directories under one root.
#[derive(Debug, Clone)]
pub struct SessionArea {
    root: PathBuf,
}

impl SessionArea {
    /// Use `root` as the parent of every session directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the uploads of `session_id`.
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf, ReviewServiceError> {
        let trimmed = session_id.trim();
        let valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed.contains(['/', '\\']);
        if !valid {
            return Err(ReviewServiceError::InvalidSession(session_id.to_string()));
        }
        Ok(self.root.join(trimmed))
    }

    /// Supported files in the session directory, sorted by name. Each file stem becomes a paper
    /// id; the first file wins when two share a stem.
    pub fn papers(&self, session_id: &str) -> Result<Vec<SessionPaper>, ReviewServiceError> {
        let dir = self.session_dir(session_id)?;
        if !dir.is_dir() {
            return Err(ReviewServiceError::SessionNotFound(session_id.to_string()));
        }

        let mut seen = HashSet::new();
        let mut papers = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|error| ReviewServiceError::Uploads(error.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_supported(path) {
                tracing::debug!(path = %path.display(), "Skipping unsupported upload");
                continue;
            }
            let Some(paper_id) = paper_id_for(path) else {
                tracing::warn!(path = %path.display(), "Upload has no usable file stem; skipping");
                continue;
            };
            if !seen.insert(paper_id.clone()) {
                tracing::warn!(path = %path.display(), paper_id = %paper_id, "Duplicate paper id in session; skipping");
                continue;
            }
            papers.push(SessionPaper {
                paper_id,
                path: path.to_path_buf(),
            });
        }
        Ok(papers)
    }
}

fn paper_id_for(path: &Path) -> Option<PaperId> {
    let stem = path.file_stem()?.to_str()?;
    PaperId::new(stem).ok()
}

/// Wires sessions, ingestion, generation, and history together.
pub struct ReviewService {
    sessions: SessionArea,
    ingestion: IngestionService,
    orchestrator: ReviewOrchestrator,
    history: Arc<dyn HistoryStore>,
    metrics: Arc<PipelineMetrics>,
}

impl ReviewService {
    /// Assemble a service from already-built parts.
    pub fn new(
        sessions: SessionArea,
        ingestion: IngestionService,
        orchestrator: ReviewOrchestrator,
        history: Arc<dyn HistoryStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sessions,
            ingestion,
            orchestrator,
            history,
            metrics,
        }
    }

    /// Build every client and service described by `config`, creating the Qdrant collection
    /// when needed.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let metrics = Arc::new(PipelineMetrics::new());
        let index: Arc<dyn VectorIndex> = match config.store.kind {
            VectorStoreKind::Memory => {
                tracing::info!("Using in-memory vector index");
                Arc::new(MemoryIndex::new())
            }
            VectorStoreKind::Qdrant => {
                let qdrant = QdrantIndex::new(&config.store).context("failed to configure Qdrant")?;
                qdrant
                    .ensure_collection(config.embedding.dimension as u64)
                    .await
                    .context("failed to ensure Qdrant collection")?;
                tracing::info!(collection = %config.store.qdrant_collection_name, "Using Qdrant vector index");
                Arc::new(qdrant)
            }
        };

        let embedder = build_embedding_client(&config.embedding).context("failed to build embedding client")?;
        let dedup_encoder = match &config.dedup_embedding {
            Some(settings) => {
                Some(build_embedding_client(settings).context("failed to build de-duplication encoder")?)
            }
            None => {
                tracing::warn!("No semantic encoder configured; generated sections get exact de-duplication only");
                None
            }
        };
        let completion = build_completion_client(&config.completion).context("failed to build completion client")?;
        let pipeline = &config.pipeline;

        let policy = if pipeline.skip_populated_sections {
            StoredSectionPolicy::SkipPopulatedSections
        } else {
            StoredSectionPolicy::UpsertAll
        };
        let ingestion = IngestionService::new(
            SectionClassifier::new(Arc::clone(&completion)),
            Arc::clone(&embedder),
            Arc::clone(&index),
            TextNormalizer::new().context("failed to compile normalization patterns")?,
            TextChunker::new(pipeline.chunk_unit).context("failed to build chunker")?,
            IngestionOptions {
                chunk_size: pipeline.chunk_size,
                chunk_overlap: pipeline.chunk_overlap,
                concurrency: pipeline.ingest_concurrency,
                policy,
                poll_retries: pipeline.upsert_poll_retries,
                poll_delay: pipeline.upsert_poll_delay,
            },
            Arc::clone(&metrics),
        );

        let retrieval = RetrievalService::new(
            embedder,
            index,
            pipeline.retrieval_concurrency,
            pipeline.retrieval_query_timeout,
        );
        let generator = SectionGenerator::new(
            completion,
            dedup_encoder.map(|encoder| SemanticDeduplicator::new(encoder, pipeline.similarity_threshold)),
        );
        let orchestrator = ReviewOrchestrator::new(
            retrieval,
            generator,
            OrchestratorOptions {
                top_k: pipeline.retrieval_top_k,
                chunk_budget: pipeline.section_chunk_budget,
                previous_section_char_limit: pipeline.previous_section_char_limit,
            },
            Arc::clone(&metrics),
        );

        Ok(Self::new(
            SessionArea::new(&config.uploads_dir),
            ingestion,
            orchestrator,
            Arc::new(MemoryHistoryStore::new()),
            metrics,
        ))
    }

    /// Paper ids uploaded for the session, or `None` when the session has none and papers
    /// should be discovered from the index.
    fn session_paper_ids(&self, session_id: &str) -> Result<Option<Vec<PaperId>>, ReviewServiceError> {
        match self.sessions.papers(session_id) {
            Ok(papers) if !papers.is_empty() => {
                Ok(Some(papers.into_iter().map(|paper| paper.paper_id).collect()))
            }
            Ok(_) | Err(ReviewServiceError::SessionNotFound(_)) => {
                tracing::info!(session_id, "No uploads for session; discovering papers from the index");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

#[async_trait]
impl ReviewApi for ReviewService {
    async fn ingest_session(&self, session_id: &str) -> Result<Vec<IngestReport>, ReviewServiceError> {
        let papers = self.sessions.papers(session_id)?;
        tracing::info!(session_id, papers = papers.len(), "Ingesting session");

        let mut reports = Vec::with_capacity(papers.len());
        for paper in papers {
            let text = extract_text(&paper.path).await;
            if text.trim().is_empty() {
                tracing::info!(paper_id = %paper.paper_id, path = %paper.path.display(), "Nothing to ingest");
                continue;
            }
            reports.push(self.ingestion.ingest_text(&paper.paper_id, &text).await?);
        }
        Ok(reports)
    }

    async fn generate(&self, session_id: &str, prompt: &str) -> Result<Review, ReviewServiceError> {
        if prompt.trim().is_empty() {
            return Err(ReviewServiceError::InvalidRequest("prompt must not be empty".into()));
        }
        let paper_ids = self.session_paper_ids(session_id)?;
        Ok(self.orchestrator.generate_review(prompt, paper_ids).await)
    }

    async fn save_review(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, ReviewServiceError> {
        Ok(self.history.save(entry).await?)
    }

    async fn get_review(&self, prompt_id: i64) -> Result<HistoryEntry, ReviewServiceError> {
        Ok(self.history.get(prompt_id).await?)
    }

    async fn user_history(&self, user_id: i64) -> Result<Vec<HistoryEntry>, ReviewServiceError> {
        Ok(self.history.list_for_user(user_id).await?)
    }

    async fn delete_review(&self, prompt_id: i64) -> Result<(), ReviewServiceError> {
        Ok(self.history.delete(prompt_id).await?)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn session_ids_cannot_escape_the_upload_root() {
        let area = SessionArea::new("uploads");
        for bad in ["", "  ", "..", ".", "a/b", "..\\x"] {
            assert!(matches!(
                area.session_dir(bad),
                Err(ReviewServiceError::InvalidSession(_))
            ));
        }
        assert_eq!(area.session_dir("s1").expect("dir"), Path::new("uploads").join("s1"));
    }

    #[test]
    fn papers_are_sorted_supported_and_unique_by_stem() {
        let root = tempdir().expect("tempdir");
        let session = root.path().join("s1");
        std::fs::create_dir_all(session.join("nested")).expect("mkdir");
        for name in ["b.txt", "a.pdf", "a.txt", "figure.png", "c.md"] {
            std::fs::write(session.join(name), "text").expect("write");
        }

        let area = SessionArea::new(root.path());
        let papers = area.papers("s1").expect("papers");
        let listed: Vec<(&str, String)> = papers
            .iter()
            .map(|paper| {
                (
                    paper.paper_id.as_str(),
                    paper.path.file_name().and_then(|name| name.to_str()).unwrap_or_default().to_string(),
                )
            })
            .collect();
        assert_eq!(
            listed,
            vec![
                ("a", "a.pdf".to_string()),
                ("b", "b.txt".to_string()),
                ("c", "c.md".to_string()),
            ]
        );
    }

    #[test]
    fn missing_session_is_reported() {
        let root = tempdir().expect("tempdir");
        let area = SessionArea::new(root.path());
        assert!(matches!(
            area.papers("absent"),
            Err(ReviewServiceError::SessionNotFound(_))
        ));
    }
}
