//! Concurrent per-paper retrieval for one section.

use super::Section;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::store::{IndexError, NamespaceKey, PaperId, VectorIndex};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that prevent retrieval from starting. Per-paper failures are logged and skipped.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The query could not be embedded.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Paper discovery through index statistics failed.
    #[error("failed to discover papers: {0}")]
    Discovery(#[from] IndexError),
}

/// Fans one query out across every paper's namespace for a section.
#[derive(Clone)]
pub struct RetrievalService {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    concurrency: usize,
    query_timeout: Option<Duration>,
}

impl RetrievalService {
    /// Query at most `concurrency` papers at a time, each bounded by `query_timeout` when set.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        concurrency: usize,
        query_timeout: Option<Duration>,
    ) -> Self {
        Self {
            embedder,
            index,
            concurrency: concurrency.max(1),
            query_timeout,
        }
    }

    /// Every paper that owns a namespace in the index.
    pub async fn discover_papers(&self) -> Result<Vec<PaperId>, RetrievalError> {
        let stats = self.index.describe_stats().await?;
        let papers: Vec<PaperId> = stats.paper_ids().into_iter().collect();
        tracing::debug!(papers = papers.len(), "Discovered papers from index namespaces");
        Ok(papers)
    }

    /// Text of the `top_k` closest chunks from each paper's `section` namespace, flattened in
    /// completion order. `None` discovers papers from the index; an empty list returns nothing.
    pub async fn retrieve(
        &self,
        query: &str,
        paper_ids: Option<&[PaperId]>,
        section: Section,
        top_k: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        let discovered;
        let papers = match paper_ids {
            Some(papers) => papers,
            None => {
                discovered = self.discover_papers().await?;
                discovered.as_slice()
            }
        };
        if papers.is_empty() {
            tracing::debug!(section = %section, "No papers to query");
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_one(query).await?;
        let per_paper: Vec<Vec<String>> = stream::iter(papers.iter().cloned())
            .map(|paper_id| self.query_paper(paper_id, section, &vector, top_k))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let texts: Vec<String> = per_paper.into_iter().flatten().collect();
        tracing::info!(
            section = %section,
            papers = papers.len(),
            chunks = texts.len(),
            "Retrieved section context"
        );
        Ok(texts)
    }

    async fn query_paper(
        &self,
        paper_id: PaperId,
        section: Section,
        vector: &[f32],
        top_k: usize,
    ) -> Vec<String> {
        let key = NamespaceKey::new(paper_id, section);
        let query = self.index.query(&key, vector, top_k);
        let outcome = match self.query_timeout {
            Some(limit) => match tokio::time::timeout(limit, query).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        namespace = %key,
                        timeout_ms = limit.as_millis() as u64,
                        "Paper query timed out; continuing without it"
                    );
                    return Vec::new();
                }
            },
            None => query.await,
        };

        match outcome {
            Ok(matches) => matches
                .into_iter()
                .map(|found| found.metadata.text)
                .collect(),
            Err(error) => {
                tracing::warn!(namespace = %key, error = %error, "Paper query failed; continuing without it");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbeddingClient;
    use crate::store::{IndexStats, Match, MemoryIndex, RecordMetadata, VectorRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn paper(id: &str) -> PaperId {
        PaperId::new(id).expect("paper id")
    }

    async fn seeded_index(embedder: &HashingEmbeddingClient) -> MemoryIndex {
        let index = MemoryIndex::new();
        for (id, section, text) in [
            ("alpha", Section::Results, "alpha results"),
            ("beta", Section::Results, "beta results"),
            ("beta", Section::Methods, "beta methods"),
        ] {
            let paper_id = paper(id);
            let vector = embedder.embed_one(text).await.expect("embed");
            index
                .upsert(
                    &NamespaceKey::new(paper_id.clone(), section),
                    vec![VectorRecord {
                        id: paper_id.chunk_record_id(0),
                        vector,
                        metadata: RecordMetadata {
                            text: text.to_string(),
                            source: paper_id,
                            section,
                        },
                    }],
                )
                .await
                .expect("upsert");
        }
        index
    }

    /// Counts embedding calls so tests can tell whether the query was encoded.
    struct CountingEncoder {
        inner: HashingEmbeddingClient,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingClient for CountingEncoder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.generate_embeddings(texts).await
        }
    }

    /// Fails or stalls queries for chosen papers and delegates the rest.
    struct FlakyIndex {
        inner: MemoryIndex,
        failing: Option<PaperId>,
        stalled: Option<PaperId>,
    }

    #[async_trait]
    impl VectorIndex for FlakyIndex {
        async fn upsert(
            &self,
            key: &NamespaceKey,
            records: Vec<VectorRecord>,
        ) -> Result<usize, IndexError> {
            self.inner.upsert(key, records).await
        }

        async fn query(
            &self,
            key: &NamespaceKey,
            vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<Match>, IndexError> {
            if self.failing.as_ref() == Some(&key.paper_id) {
                return Err(IndexError::Backend("shard offline".into()));
            }
            if self.stalled.as_ref() == Some(&key.paper_id) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.query(key, vector, top_k).await
        }

        async fn describe_stats(&self) -> Result<IndexStats, IndexError> {
            self.inner.describe_stats().await
        }
    }

    #[tokio::test]
    async fn empty_paper_list_returns_nothing_without_embedding() {
        let encoder = Arc::new(CountingEncoder {
            inner: HashingEmbeddingClient::new(16),
            calls: AtomicUsize::new(0),
        });
        let service = RetrievalService::new(encoder.clone(), Arc::new(MemoryIndex::new()), 4, None);

        let texts = service
            .retrieve("query", Some(&[]), Section::Methods, 50)
            .await
            .expect("retrieve");
        assert!(texts.is_empty());
        assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_index_discovers_no_papers() {
        let service = RetrievalService::new(
            Arc::new(HashingEmbeddingClient::new(16)),
            Arc::new(MemoryIndex::new()),
            4,
            None,
        );
        let texts = service
            .retrieve("query", None, Section::Results, 50)
            .await
            .expect("retrieve");
        assert!(texts.is_empty());
    }

    #[tokio::test]
    async fn discovery_queries_every_paper_for_the_section() {
        let embedder = HashingEmbeddingClient::new(16);
        let index = seeded_index(&embedder).await;
        let service = RetrievalService::new(Arc::new(embedder), Arc::new(index), 4, None);

        let mut texts = service
            .retrieve("results", None, Section::Results, 50)
            .await
            .expect("retrieve");
        texts.sort();
        assert_eq!(texts, vec!["alpha results", "beta results"]);

        let methods = service
            .retrieve("methods", None, Section::Methods, 50)
            .await
            .expect("retrieve");
        assert_eq!(methods, vec!["beta methods"]);
    }

    #[tokio::test]
    async fn explicit_paper_list_limits_the_fan_out() {
        let embedder = HashingEmbeddingClient::new(16);
        let index = seeded_index(&embedder).await;
        let service = RetrievalService::new(Arc::new(embedder), Arc::new(index), 4, None);

        let texts = service
            .retrieve("results", Some(&[paper("beta")]), Section::Results, 50)
            .await
            .expect("retrieve");
        assert_eq!(texts, vec!["beta results"]);
    }

    #[tokio::test]
    async fn retrieval_runs_on_a_spawned_task() {
        let embedder = HashingEmbeddingClient::new(16);
        let index = seeded_index(&embedder).await;
        let service = RetrievalService::new(Arc::new(embedder), Arc::new(index), 4, None);

        let handle = tokio::spawn(async move {
            let papers = vec![paper("alpha"), paper("beta")];
            service
                .retrieve("results", Some(&papers), Section::Results, 50)
                .await
        });
        let mut texts = handle.await.expect("join").expect("retrieve");
        texts.sort();
        assert_eq!(texts, vec!["alpha results", "beta results"]);
    }

    #[tokio::test]
    async fn failed_paper_query_is_skipped() {
        let embedder = HashingEmbeddingClient::new(16);
        let index = FlakyIndex {
            inner: seeded_index(&embedder).await,
            failing: Some(paper("alpha")),
            stalled: None,
        };
        let service = RetrievalService::new(Arc::new(embedder), Arc::new(index), 4, None);

        let texts = service
            .retrieve("results", None, Section::Results, 50)
            .await
            .expect("retrieve");
        assert_eq!(texts, vec!["beta results"]);
    }

    #[tokio::test]
    async fn slow_paper_is_dropped_after_the_timeout() {
        let embedder = HashingEmbeddingClient::new(16);
        let index = FlakyIndex {
            inner: seeded_index(&embedder).await,
            failing: None,
            stalled: Some(paper("beta")),
        };
        let service = RetrievalService::new(
            Arc::new(embedder),
            Arc::new(index),
            4,
            Some(Duration::from_millis(50)),
        );

        let texts = service
            .retrieve("results", None, Section::Results, 50)
            .await
            .expect("retrieve");
        assert_eq!(texts, vec!["alpha results"]);
    }
}
