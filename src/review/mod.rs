//! Section-aware ingestion, retrieval, and review synthesis.

pub mod classifier;
pub mod dedupe;
pub mod generator;
pub mod ingestion;
pub mod orchestrator;
pub mod prompts;
pub mod retrieval;
mod section;

pub use classifier::{Classification, FallbackReason, SectionClassifier};
pub use generator::{GenerationFailure, SectionDraft, SectionGenerator, SectionRequest};
pub use ingestion::{IngestError, IngestReport, IngestionOptions, IngestionService, StoredSectionPolicy};
pub use orchestrator::{OrchestratorOptions, Review, ReviewOrchestrator, fixed_limit_previous_sections};
pub use retrieval::{RetrievalError, RetrievalService};
pub use section::{CHARS_PER_WORD, Section, UnknownSection};

/// Longest prefix of `text` holding at most `limit` characters.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
