use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity since startup.
#[derive(Default)]
pub struct PipelineMetrics {
    papers_ingested: AtomicU64,
    chunks_stored: AtomicU64,
    chunks_skipped: AtomicU64,
    chunks_failed: AtomicU64,
    classification_fallbacks: AtomicU64,
    reviews_generated: AtomicU64,
    sections_failed: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one ingested paper together with the outcome of each of its chunks.
    pub fn record_paper(&self, stored: u64, skipped: u64, failed: u64) {
        self.papers_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_stored.fetch_add(stored, Ordering::Relaxed);
        self.chunks_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.chunks_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record a chunk whose label was replaced by the fallback section.
    pub fn record_classification_fallback(&self) {
        self.classification_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished review and how many of its sections came back empty because of a failure.
    pub fn record_review(&self, failed_sections: u64) {
        self.reviews_generated.fetch_add(1, Ordering::Relaxed);
        self.sections_failed
            .fetch_add(failed_sections, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            papers_ingested: self.papers_ingested.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            classification_fallbacks: self.classification_fallbacks.load(Ordering::Relaxed),
            reviews_generated: self.reviews_generated.load(Ordering::Relaxed),
            sections_failed: self.sections_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Papers that went through ingestion.
    pub papers_ingested: u64,
    /// Chunks embedded and written to the index.
    pub chunks_stored: u64,
    /// Chunks skipped because their section namespace was already populated.
    pub chunks_skipped: u64,
    /// Chunks whose embedding or upsert failed.
    pub chunks_failed: u64,
    /// Chunks filed under the fallback section.
    pub classification_fallbacks: u64,
    /// Reviews produced.
    pub reviews_generated: u64,
    /// Sections returned empty because generation failed.
    pub sections_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_papers_and_chunk_outcomes() {
        let metrics = PipelineMetrics::new();
        metrics.record_paper(4, 1, 0);
        metrics.record_paper(2, 0, 3);
        metrics.record_classification_fallback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.papers_ingested, 2);
        assert_eq!(snapshot.chunks_stored, 6);
        assert_eq!(snapshot.chunks_skipped, 1);
        assert_eq!(snapshot.chunks_failed, 3);
        assert_eq!(snapshot.classification_fallbacks, 1);
    }

    #[test]
    fn records_reviews() {
        let metrics = PipelineMetrics::new();
        metrics.record_review(0);
        metrics.record_review(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.reviews_generated, 2);
        assert_eq!(snapshot.sections_failed, 2);
        assert_eq!(snapshot.papers_ingested, 0);
    }
}
