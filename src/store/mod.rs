//! Namespaced vector index abstraction.
//!
//! Each `(paper, section)` pair owns one partition. Records can only be matched by querying
//! their exact partition, so retrieval fans out across papers for a fixed section.

pub mod memory;
pub mod namespace;

use crate::qdrant::QdrantError;
use crate::review::Section;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

pub use crate::qdrant::QdrantIndex;
pub use memory::MemoryIndex;
pub use namespace::{InvalidPaperId, NAMESPACE_ROOT, NamespaceKey, PaperId};

/// Errors surfaced by vector index adapters.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Qdrant rejected or failed a request.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Backend-specific failure without a dedicated variant.
    #[error("vector index failure: {0}")]
    Backend(String),
}

/// Metadata stored next to every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Chunk text returned to retrieval callers.
    pub text: String,
    /// Paper the chunk came from.
    pub source: PaperId,
    /// Section the chunk was classified into.
    pub section: Section,
}

/// One vector to write into a namespace.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Stable identifier; writing the same id again overwrites the record.
    pub id: String,
    /// Embedding of `metadata.text`.
    pub vector: Vec<f32>,
    /// Stored metadata.
    pub metadata: RecordMetadata,
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone)]
pub struct Match {
    /// Identifier of the matched record.
    pub id: String,
    /// Similarity score, higher is closer.
    pub score: f32,
    /// Metadata written with the record.
    pub metadata: RecordMetadata,
}

/// Vector counts per namespace owned by this pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Vector count keyed by namespace.
    pub namespaces: BTreeMap<NamespaceKey, u64>,
}

impl IndexStats {
    /// Every paper that owns at least one namespace, duplicates collapsed.
    pub fn paper_ids(&self) -> BTreeSet<PaperId> {
        self.namespaces
            .keys()
            .map(|key| key.paper_id.clone())
            .collect()
    }

    /// Sections of `paper_id` whose namespace currently holds vectors.
    pub fn populated_sections(&self, paper_id: &PaperId) -> BTreeSet<Section> {
        self.namespaces
            .iter()
            .filter(|(key, count)| key.paper_id == *paper_id && **count > 0)
            .map(|(key, _)| key.section)
            .collect()
    }

    /// Total vectors stored across every section of `paper_id`.
    pub fn vectors_for(&self, paper_id: &PaperId) -> u64 {
        self.namespaces
            .iter()
            .filter(|(key, _)| key.paper_id == *paper_id)
            .map(|(_, count)| *count)
            .sum()
    }
}

/// Storage operations the pipeline needs from a vector index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Write `records` into the namespace for `key`, overwriting records with the same id.
    /// Returns the number of records submitted.
    async fn upsert(&self, key: &NamespaceKey, records: Vec<VectorRecord>) -> Result<usize, IndexError>;

    /// Return up to `top_k` records of `key`'s namespace closest to `vector`, best first.
    async fn query(
        &self,
        key: &NamespaceKey,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError>;

    /// Per-namespace vector counts.
    async fn describe_stats(&self) -> Result<IndexStats, IndexError>;
}
