//! Line-level de-duplication of generated section text.

use crate::embedding::{EmbeddingClient, EmbeddingClientError, cosine_similarity};
use std::collections::HashSet;
use std::sync::Arc;

/// Split `text` on `\n`, dropping blank lines and exact repeats. First occurrences keep their
/// order and original spacing.
pub fn exact_unique_lines(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split('\n')
        .filter(|line| !line.trim().is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_string)
        .collect()
}

/// Indices of the vectors to keep. The first vector is always kept; each later one is kept
/// when its mean cosine similarity to the already-kept vectors is below `threshold`.
pub fn select_distinct(vectors: &[Vec<f32>], threshold: f32) -> Vec<usize> {
    let mut kept: Vec<usize> = Vec::new();
    for (index, candidate) in vectors.iter().enumerate() {
        if kept.is_empty() {
            kept.push(index);
            continue;
        }
        let total: f32 = kept
            .iter()
            .map(|&accepted| cosine_similarity(candidate, &vectors[accepted]))
            .sum();
        let mean = total / kept.len() as f32;
        if mean < threshold {
            kept.push(index);
        }
    }
    kept
}

/// Drops lines that are semantically close to lines already accepted.
#[derive(Clone)]
pub struct SemanticDeduplicator {
    encoder: Arc<dyn EmbeddingClient>,
    threshold: f32,
}

impl SemanticDeduplicator {
    /// Use `encoder` for line embeddings and drop lines whose mean similarity reaches `threshold`.
    pub fn new(encoder: Arc<dyn EmbeddingClient>, threshold: f32) -> Self {
        Self { encoder, threshold }
    }

    /// Similarity cut-off in use.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Filter `lines`, preserving order. All lines are encoded in one batch.
    pub async fn dedupe(&self, lines: Vec<String>) -> Result<Vec<String>, EmbeddingClientError> {
        if lines.len() < 2 {
            return Ok(lines);
        }

        let vectors = self.encoder.generate_embeddings(lines.clone()).await?;
        if vectors.len() != lines.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "received {} embeddings for {} lines",
                vectors.len(),
                lines.len()
            )));
        }

        let keep: HashSet<usize> = select_distinct(&vectors, self.threshold).into_iter().collect();
        let total = lines.len();
        let filtered: Vec<String> = lines
            .into_iter()
            .enumerate()
            .filter(|(index, _)| keep.contains(index))
            .map(|(_, line)| line)
            .collect();
        tracing::debug!(
            total,
            kept = filtered.len(),
            threshold = self.threshold,
            "Semantic de-duplication applied"
        );
        Ok(filtered)
    }
}
