//! Process-local [`VectorIndex`] used for offline runs and tests.
//!
//! Search is brute-force cosine similarity over the queried namespace.

use super::{IndexError, IndexStats, Match, NamespaceKey, RecordMetadata, VectorIndex, VectorRecord};
use crate::embedding::cosine_similarity;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

struct StoredVector {
    vector: Vec<f32>,
    metadata: RecordMetadata,
}

/// In-memory vector index keyed by namespace.
#[derive(Default)]
pub struct MemoryIndex {
    namespaces: RwLock<HashMap<NamespaceKey, BTreeMap<String, StoredVector>>>,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, key: &NamespaceKey, records: Vec<VectorRecord>) -> Result<usize, IndexError> {
        let count = records.len();
        let mut namespaces = self.namespaces.write().await;
        let namespace = namespaces.entry(key.clone()).or_default();
        for record in records {
            namespace.insert(
                record.id,
                StoredVector {
                    vector: record.vector,
                    metadata: record.metadata,
                },
            );
        }
        Ok(count)
    }

    async fn query(
        &self,
        key: &NamespaceKey,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Match>, IndexError> {
        let namespaces = self.namespaces.read().await;
        let Some(namespace) = namespaces.get(key) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<Match> = namespace
            .iter()
            .map(|(id, stored)| Match {
                id: id.clone(),
                score: cosine_similarity(vector, &stored.vector),
                metadata: stored.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
        let namespaces = self.namespaces.read().await;
        Ok(IndexStats {
            namespaces: namespaces
                .iter()
                .map(|(key, records)| (key.clone(), records.len() as u64))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::Section;
    use crate::store::PaperId;

    fn record(paper: &PaperId, section: Section, ordinal: usize, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: paper.chunk_record_id(ordinal),
            vector,
            metadata: RecordMetadata {
                text: format!("chunk {ordinal}"),
                source: paper.clone(),
                section,
            },
        }
    }

    #[tokio::test]
    async fn queries_are_scoped_to_the_namespace() {
        let index = MemoryIndex::new();
        let paper = PaperId::new("trial").expect("paper id");
        let background = NamespaceKey::new(paper.clone(), Section::Background);
        let methods = NamespaceKey::new(paper.clone(), Section::Methods);

        index
            .upsert(&background, vec![record(&paper, Section::Background, 0, vec![1.0, 0.0])])
            .await
            .expect("upsert");
        index
            .upsert(&methods, vec![record(&paper, Section::Methods, 1, vec![1.0, 0.0])])
            .await
            .expect("upsert");

        let hits = index.query(&background, &[1.0, 0.0], 10).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.text, "chunk 0");
    }

    #[tokio::test]
    async fn ranks_by_similarity_and_truncates() {
        let index = MemoryIndex::new();
        let paper = PaperId::new("trial").expect("paper id");
        let key = NamespaceKey::new(paper.clone(), Section::Results);
        index
            .upsert(
                &key,
                vec![
                    record(&paper, Section::Results, 0, vec![0.0, 1.0]),
                    record(&paper, Section::Results, 1, vec![1.0, 0.1]),
                    record(&paper, Section::Results, 2, vec![0.7, 0.7]),
                ],
            )
            .await
            .expect("upsert");

        let hits = index.query(&key, &[1.0, 0.0], 2).await.expect("query");
        let ids: Vec<_> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["trial-chunk-1", "trial-chunk-2"]);
    }

    #[tokio::test]
    async fn upserting_the_same_id_overwrites() {
        let index = MemoryIndex::new();
        let paper = PaperId::new("trial").expect("paper id");
        let key = NamespaceKey::new(paper.clone(), Section::Conclusion);
        for _ in 0..2 {
            index
                .upsert(&key, vec![record(&paper, Section::Conclusion, 0, vec![1.0])])
                .await
                .expect("upsert");
        }

        let stats = index.describe_stats().await.expect("stats");
        assert_eq!(stats.vectors_for(&paper), 1);
    }
}
