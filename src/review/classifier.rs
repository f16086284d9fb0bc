//! Closed-set section classification of chunks.

use super::Section;
use crate::completion::CompletionClient;
use std::sync::Arc;

/// Section assigned whenever the model's answer cannot be used.
pub const FALLBACK_SECTION: Section = Section::Background;

/// Why a chunk was filed under [`FALLBACK_SECTION`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The model answered with something outside the five labels.
    UnrecognizedLabel(String),
    /// The completion call failed.
    GenerationFailed(String),
}

/// Outcome of classifying one chunk. Always resolves to a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The model returned a valid label.
    Confident(Section),
    /// The fallback policy applied.
    Fallback {
        /// Always [`FALLBACK_SECTION`].
        section: Section,
        /// What went wrong.
        reason: FallbackReason,
    },
}

impl Classification {
    /// Section the chunk belongs to.
    pub fn section(&self) -> Section {
        match self {
            Classification::Confident(section) => *section,
            Classification::Fallback { section, .. } => *section,
        }
    }

    /// Whether the fallback policy was applied.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Classification::Fallback { .. })
    }

    fn fallback(reason: FallbackReason) -> Self {
        Classification::Fallback {
            section: FALLBACK_SECTION,
            reason,
        }
    }
}

/// Assigns each chunk to one section with a single completion call.
#[derive(Clone)]
pub struct SectionClassifier {
    client: Arc<dyn CompletionClient>,
}

impl SectionClassifier {
    /// Wrap a completion client.
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Classify `chunk_text`. Never fails and never retries: unusable answers and failed calls
    /// both resolve to [`FALLBACK_SECTION`].
    pub async fn classify(&self, chunk_text: &str) -> Classification {
        let prompt = classification_prompt(chunk_text);
        match self.client.complete(&prompt).await {
            Ok(answer) => interpret_label(&answer),
            Err(error) => {
                tracing::debug!(error = %error, "Classification call failed; using fallback section");
                Classification::fallback(FallbackReason::GenerationFailed(error.to_string()))
            }
        }
    }
}

/// Map a raw model answer onto the closed label set. Only surrounding whitespace is forgiven.
pub fn interpret_label(answer: &str) -> Classification {
    let label = answer.trim();
    match label.parse::<Section>() {
        Ok(section) => Classification::Confident(section),
        Err(_) => {
            tracing::debug!(label, "Unrecognized section label; using fallback section");
            Classification::fallback(FallbackReason::UnrecognizedLabel(label.to_string()))
        }
    }
}

fn classification_prompt(chunk_text: &str) -> String {
    let labels = Section::ALL
        .iter()
        .map(|section| format!("- {section}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You label excerpts of scientific papers with the section they come from.\n\
         Pick exactly one of these sections:\n\
         {labels}\n\n\
         If you are unsure, pick the closest match.\n\n\
         ---TEXT---\n\
         {chunk_text}\n\
         ----------\n\n\
         Answer with the section name only:"
    )
}
