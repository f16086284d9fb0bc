//! Classification, embedding, and namespaced upsert of a paper's chunks.
//!
//! Every chunk is an isolated unit of work: it is classified, checked against the sections
//! already stored for its paper, embedded, and upserted into `(paper, section)`. Units run
//! concurrently on a bounded stream created per call. After the batch, index statistics are
//! polled until the paper's vector count reaches the expected total or the retry budget runs
//! out. Running out is logged and reported, never fatal.

use super::classifier::SectionClassifier;
use super::Section;
use crate::embedding::EmbeddingClient;
use crate::metrics::PipelineMetrics;
use crate::processing::{ChunkingError, TextChunker, TextNormalizer};
use crate::store::{NamespaceKey, PaperId, RecordMetadata, VectorIndex, VectorRecord};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised before per-chunk work starts.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The document could not be split into chunks.
    #[error("failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
}

/// What to do with chunks whose `(paper, section)` namespace already holds vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredSectionPolicy {
    /// Treat a populated namespace as complete and skip its chunks.
    #[default]
    SkipPopulatedSections,
    /// Upsert every chunk; deterministic record ids overwrite earlier copies.
    UpsertAll,
}

/// Tunables for one ingestion service.
#[derive(Debug, Clone)]
pub struct IngestionOptions {
    /// Target chunk length.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Maximum chunks in flight.
    pub concurrency: usize,
    /// Handling of already-populated namespaces.
    pub policy: StoredSectionPolicy,
    /// Number of stats polls after the batch.
    pub poll_retries: usize,
    /// Delay between stats polls.
    pub poll_delay: Duration,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 300,
            concurrency: 8,
            policy: StoredSectionPolicy::SkipPopulatedSections,
            poll_retries: 10,
            poll_delay: Duration::from_secs(2),
        }
    }
}

/// Summary of one paper's ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Paper that was ingested.
    pub paper_id: PaperId,
    /// Chunks handed to the service.
    pub submitted: usize,
    /// Chunks embedded and upserted.
    pub stored: usize,
    /// Chunks skipped because their namespace was already populated.
    pub skipped: usize,
    /// Chunks dropped after an embedding or upsert failure.
    pub failed: usize,
    /// Chunks filed under the fallback section.
    pub fallbacks: usize,
    /// Whether the index reported the expected vector count before polling stopped.
    pub converged: bool,
    /// Vector count last observed for the paper.
    pub observed_vectors: u64,
    /// Vector count the index should report once every upsert is visible.
    pub expected_vectors: u64,
    /// Stored chunk count per section.
    pub sections: BTreeMap<Section, usize>,
}

enum ChunkOutcome {
    Stored(Section),
    Skipped(Section),
    Failed(Section),
}

struct ChunkResult {
    outcome: ChunkOutcome,
    fallback: bool,
}

/// Turns papers into namespaced vector records.
pub struct IngestionService {
    classifier: SectionClassifier,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    normalizer: TextNormalizer,
    chunker: TextChunker,
    options: IngestionOptions,
    metrics: Arc<PipelineMetrics>,
}

impl IngestionService {
    /// Wire the service to its collaborators.
    pub fn new(
        classifier: SectionClassifier,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        normalizer: TextNormalizer,
        chunker: TextChunker,
        options: IngestionOptions,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            classifier,
            embedder,
            index,
            normalizer,
            chunker,
            options,
            metrics,
        }
    }

    /// Normalize and chunk raw document text, then ingest the chunks.
    pub async fn ingest_text(&self, paper_id: &PaperId, text: &str) -> Result<IngestReport, IngestError> {
        let normalized = self.normalizer.normalize(text);
        let chunks = self
            .chunker
            .chunk(&normalized, self.options.chunk_size, self.options.chunk_overlap)?;
        tracing::info!(
            paper_id = %paper_id,
            chars = normalized.chars().count(),
            chunks = chunks.len(),
            "Chunked document"
        );
        Ok(self.ingest(paper_id, chunks).await)
    }

    /// Classify, embed, and upsert `chunks`; chunk `i` gets record id `{paper_id}-chunk-{i}`.
    pub async fn ingest(&self, paper_id: &PaperId, chunks: Vec<String>) -> IngestReport {
        let submitted = chunks.len();
        let (populated, baseline) = self.stored_sections(paper_id).await;
        tracing::info!(
            paper_id = %paper_id,
            chunks = submitted,
            populated = ?populated,
            policy = ?self.options.policy,
            "Ingesting paper"
        );

        let results: Vec<ChunkResult> = stream::iter(chunks.into_iter().enumerate())
            .map(|(ordinal, text)| self.process_chunk(paper_id, ordinal, text, &populated))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut report = IngestReport {
            paper_id: paper_id.clone(),
            submitted,
            stored: 0,
            skipped: 0,
            failed: 0,
            fallbacks: 0,
            converged: true,
            observed_vectors: baseline,
            expected_vectors: baseline,
            sections: BTreeMap::new(),
        };
        for result in results {
            if result.fallback {
                report.fallbacks += 1;
            }
            match result.outcome {
                ChunkOutcome::Stored(section) => {
                    report.stored += 1;
                    *report.sections.entry(section).or_insert(0) += 1;
                }
                ChunkOutcome::Skipped(_) => report.skipped += 1,
                ChunkOutcome::Failed(_) => report.failed += 1,
            }
        }

        if report.stored > 0 {
            let stored = report.stored as u64;
            report.expected_vectors = match self.options.policy {
                StoredSectionPolicy::SkipPopulatedSections => baseline + stored,
                StoredSectionPolicy::UpsertAll => baseline.max(stored),
            };
            let (converged, observed) = self.await_convergence(paper_id, report.expected_vectors).await;
            report.converged = converged;
            report.observed_vectors = observed;
        }

        self.metrics.record_paper(
            report.stored as u64,
            report.skipped as u64,
            report.failed as u64,
        );
        tracing::info!(
            paper_id = %paper_id,
            stored = report.stored,
            skipped = report.skipped,
            failed = report.failed,
            fallbacks = report.fallbacks,
            converged = report.converged,
            "Ingestion finished"
        );
        report
    }

    /// Populated sections and total vector count for `paper_id`. A stats failure is treated as
    /// an empty index so ingestion can proceed.
    async fn stored_sections(&self, paper_id: &PaperId) -> (BTreeSet<Section>, u64) {
        match self.index.describe_stats().await {
            Ok(stats) => (stats.populated_sections(paper_id), stats.vectors_for(paper_id)),
            Err(error) => {
                tracing::warn!(paper_id = %paper_id, error = %error, "Could not read index stats; assuming no stored sections");
                (BTreeSet::new(), 0)
            }
        }
    }

    async fn process_chunk(
        &self,
        paper_id: &PaperId,
        ordinal: usize,
        text: String,
        populated: &BTreeSet<Section>,
    ) -> ChunkResult {
        let classification = self.classifier.classify(&text).await;
        let section = classification.section();
        let fallback = classification.is_fallback();
        if fallback {
            self.metrics.record_classification_fallback();
        }

        if self.options.policy == StoredSectionPolicy::SkipPopulatedSections
            && populated.contains(&section)
        {
            tracing::debug!(paper_id = %paper_id, ordinal, section = %section, "Section already stored; skipping chunk");
            return ChunkResult {
                outcome: ChunkOutcome::Skipped(section),
                fallback,
            };
        }

        let outcome = match self.store_chunk(paper_id, ordinal, text, section).await {
            Ok(()) => ChunkOutcome::Stored(section),
            Err(reason) => {
                tracing::warn!(paper_id = %paper_id, ordinal, section = %section, error = %reason, "Dropping chunk");
                ChunkOutcome::Failed(section)
            }
        };
        ChunkResult { outcome, fallback }
    }

    async fn store_chunk(
        &self,
        paper_id: &PaperId,
        ordinal: usize,
        text: String,
        section: Section,
    ) -> Result<(), String> {
        let vector = self
            .embedder
            .embed_one(&text)
            .await
            .map_err(|error| format!("embedding failed: {error}"))?;
        let key = NamespaceKey::new(paper_id.clone(), section);
        let record = VectorRecord {
            id: paper_id.chunk_record_id(ordinal),
            vector,
            metadata: RecordMetadata {
                text,
                source: paper_id.clone(),
                section,
            },
        };
        self.index
            .upsert(&key, vec![record])
            .await
            .map_err(|error| format!("upsert failed: {error}"))?;
        Ok(())
    }

    /// Poll stats until `paper_id` holds at least `expected` vectors. Returns whether that
    /// happened and the last observed count.
    async fn await_convergence(&self, paper_id: &PaperId, expected: u64) -> (bool, u64) {
        let retries = self.options.poll_retries;
        let mut observed = 0;
        for attempt in 1..=retries {
            match self.index.describe_stats().await {
                Ok(stats) => {
                    observed = stats.vectors_for(paper_id);
                    if observed >= expected {
                        tracing::debug!(paper_id = %paper_id, attempt, observed, expected, "Index converged");
                        return (true, observed);
                    }
                    tracing::debug!(paper_id = %paper_id, attempt, observed, expected, "Waiting for index to converge");
                }
                Err(error) => {
                    tracing::debug!(paper_id = %paper_id, attempt, error = %error, "Stats poll failed");
                }
            }
            if attempt < retries {
                tokio::time::sleep(self.options.poll_delay).await;
            }
        }

        tracing::warn!(
            paper_id = %paper_id,
            retries,
            observed,
            expected,
            "Index did not report every upserted chunk; continuing"
        );
        (false, observed)
    }
}
