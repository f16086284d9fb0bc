//! Bounded, de-duplicated generation of one review section.

use super::dedupe::{SemanticDeduplicator, exact_unique_lines};
use super::prompts::{build_context, section_prompt};
use super::{Section, truncate_chars};
use crate::completion::CompletionClient;
use serde::Serialize;
use std::sync::Arc;

/// Inputs for one section.
#[derive(Debug, Clone, Copy)]
pub struct SectionRequest<'a> {
    /// Section being written.
    pub section: Section,
    /// Review question supplied by the user.
    pub query: &'a str,
    /// Retrieved chunk texts, in the order they should be considered.
    pub retrieved: &'a [String],
    /// Already-truncated text of earlier sections, in writing order.
    pub previous_sections: &'a [String],
    /// Section-specific writing instructions.
    pub instructions: &'a str,
    /// Maximum number of retrieved chunks placed in the prompt.
    pub chunk_budget: usize,
}

/// Why a section came back empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GenerationFailure {
    /// The completion call failed.
    Completion(String),
    /// The model answered with nothing but whitespace.
    EmptyResponse,
}

/// Generated text for one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionDraft {
    /// Section the text belongs to.
    pub section: Section,
    /// Final text; empty when generation failed.
    pub text: String,
    /// Set when the section could not be generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<GenerationFailure>,
}

impl SectionDraft {
    fn failed(section: Section, failure: GenerationFailure) -> Self {
        Self {
            section,
            text: String::new(),
            failure: Some(failure),
        }
    }

    /// Whether generation failed for this section.
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Writes one section per call from retrieved context and earlier sections.
#[derive(Clone)]
pub struct SectionGenerator {
    client: Arc<dyn CompletionClient>,
    deduplicator: Option<SemanticDeduplicator>,
}

impl SectionGenerator {
    /// Combine a completion client with the line de-duplicator. Without one, only blank and
    /// repeated lines are removed.
    pub fn new(client: Arc<dyn CompletionClient>, deduplicator: Option<SemanticDeduplicator>) -> Self {
        Self {
            client,
            deduplicator,
        }
    }

    /// Generate the section described by `request`.
    ///
    /// A failed or blank completion yields an empty draft carrying the failure. Otherwise the
    /// response is trimmed, cut to the section's character ceiling, stripped of blank and
    /// repeated lines, and semantically de-duplicated.
    pub async fn generate_section(&self, request: SectionRequest<'_>) -> SectionDraft {
        let section = request.section;
        let context = build_context(
            request.retrieved,
            request.previous_sections,
            request.chunk_budget,
        );
        let prompt = section_prompt(
            section,
            request.query,
            &context,
            request.instructions,
            section.target_words(),
        );
        tracing::debug!(
            section = %section,
            retrieved = request.retrieved.len(),
            previous = request.previous_sections.len(),
            context_chars = context.chars().count(),
            "Generating section"
        );

        let response = match self.client.complete(&prompt).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(section = %section, error = %error, "Section generation failed");
                return SectionDraft::failed(section, GenerationFailure::Completion(error.to_string()));
            }
        };

        let trimmed = response.trim();
        if trimmed.is_empty() {
            tracing::warn!(section = %section, "Model returned an empty section");
            return SectionDraft::failed(section, GenerationFailure::EmptyResponse);
        }

        let bounded = truncate_chars(trimmed, section.char_ceiling());
        let lines = exact_unique_lines(bounded);
        let Some(deduplicator) = &self.deduplicator else {
            return SectionDraft {
                section,
                text: lines.join("\n"),
                failure: None,
            };
        };
        let lines = match deduplicator.dedupe(lines.clone()).await {
            Ok(filtered) => filtered,
            Err(error) => {
                tracing::warn!(
                    section = %section,
                    error = %error,
                    "Semantic de-duplication unavailable; keeping exact-deduplicated lines"
                );
                lines
            }
        };

        SectionDraft {
            section,
            text: lines.join("\n"),
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionClientError;
    use crate::embedding::{EmbeddingClient, EmbeddingClientError};
    use crate::review::prompts::section_instructions;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        answer: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answer: Result<&str, &str>) -> Arc<Self> {
            Arc::new(Self {
                answer: answer.map(str::to_string).map_err(str::to_string),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String, CompletionClientError> {
            self.prompts.lock().expect("lock").push(prompt.to_string());
            self.answer
                .clone()
                .map_err(CompletionClientError::GenerationFailed)
        }
    }

    /// Maps lines containing "vaccine" onto one axis and everything else onto distinct axes.
    struct TopicEncoder;

    #[async_trait]
    impl EmbeddingClient for TopicEncoder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(index, text)| {
                    let mut vector = vec![0.0; texts.len() + 1];
                    if text.contains("vaccine") {
                        vector[0] = 1.0;
                    } else {
                        vector[index + 1] = 1.0;
                    }
                    vector
                })
                .collect())
        }
    }

    struct BrokenEncoder;

    #[async_trait]
    impl EmbeddingClient for BrokenEncoder {
        async fn generate_embeddings(
            &self,
            _texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Err(EmbeddingClientError::ProviderUnavailable("offline".into()))
        }
    }

    fn generator(client: Arc<Scripted>, encoder: Arc<dyn EmbeddingClient>) -> SectionGenerator {
        SectionGenerator::new(client, Some(SemanticDeduplicator::new(encoder, 0.8)))
    }

    fn request<'a>(section: Section, retrieved: &'a [String], previous: &'a [String]) -> SectionRequest<'a> {
        SectionRequest {
            section,
            query: "Are mRNA vaccines effective?",
            retrieved,
            previous_sections: previous,
            instructions: section_instructions(section),
            chunk_budget: 30,
        }
    }

    #[tokio::test]
    async fn near_duplicate_lines_collapse_to_one() {
        let client = Scripted::new(Ok(
            "The vaccine cut infections.\nThe vaccine reduced infections.\nSide effects were mild.",
        ));
        let draft = generator(client, Arc::new(TopicEncoder))
            .generate_section(request(Section::Results, &[], &[]))
            .await;

        assert_eq!(draft.failure, None);
        assert_eq!(draft.text, "The vaccine cut infections.\nSide effects were mild.");
    }

    #[tokio::test]
    async fn exact_repeats_and_blank_lines_are_removed() {
        let client = Scripted::new(Ok("Line one.\n\nLine one.\nLine two.\n"));
        let draft = generator(client, Arc::new(TopicEncoder))
            .generate_section(request(Section::Methods, &[], &[]))
            .await;
        assert_eq!(draft.text, "Line one.\nLine two.");
    }

    #[tokio::test]
    async fn output_is_cut_to_the_character_ceiling() {
        let long_line = "x".repeat(Section::Conclusion.char_ceiling() + 500);
        let client = Scripted::new(Ok(&long_line));
        let draft = generator(client, Arc::new(TopicEncoder))
            .generate_section(request(Section::Conclusion, &[], &[]))
            .await;
        assert_eq!(draft.text.chars().count(), Section::Conclusion.char_ceiling());
    }

    #[tokio::test]
    async fn blank_response_is_an_empty_failed_section() {
        let client = Scripted::new(Ok("   \n "));
        let draft = generator(client, Arc::new(TopicEncoder))
            .generate_section(request(Section::Discussion, &[], &[]))
            .await;
        assert_eq!(draft.text, "");
        assert_eq!(draft.failure, Some(GenerationFailure::EmptyResponse));
    }

    #[tokio::test]
    async fn completion_error_is_an_empty_failed_section() {
        let client = Scripted::new(Err("rate limited"));
        let draft = generator(client, Arc::new(TopicEncoder))
            .generate_section(request(Section::Background, &[], &[]))
            .await;
        assert_eq!(draft.text, "");
        assert!(matches!(draft.failure, Some(GenerationFailure::Completion(message)) if message.contains("rate limited")));
    }

    #[tokio::test]
    async fn without_semantic_encoder_distinct_lines_survive() {
        let client = Scripted::new(Ok(
            "The vaccine cut infections.\nThe vaccine reduced infections.\nThe vaccine cut infections.",
        ));
        let draft = SectionGenerator::new(client, None)
            .generate_section(request(Section::Results, &[], &[]))
            .await;
        assert_eq!(draft.text, "The vaccine cut infections.\nThe vaccine reduced infections.");
        assert_eq!(draft.failure, None);
    }

    #[tokio::test]
    async fn encoder_failure_keeps_exact_deduplicated_lines() {
        let client = Scripted::new(Ok("A\nA\nB"));
        let draft = generator(client, Arc::new(BrokenEncoder))
            .generate_section(request(Section::Results, &[], &[]))
            .await;
        assert_eq!(draft.text, "A\nB");
        assert_eq!(draft.failure, None);
    }

    #[tokio::test]
    async fn prompt_includes_previous_sections_before_retrieved_chunks() {
        let client = Scripted::new(Ok("Methods text."));
        let retrieved = vec!["chunk about dosing".to_string()];
        let previous = vec!["Background summary".to_string()];
        generator(Arc::clone(&client), Arc::new(TopicEncoder))
            .generate_section(request(Section::Methods, &retrieved, &previous))
            .await;

        let prompts = client.prompts.lock().expect("lock");
        let prompt = &prompts[0];
        let background_at = prompt.find("Background summary").expect("previous section");
        let chunk_at = prompt.find("chunk about dosing").expect("retrieved chunk");
        assert!(background_at < chunk_at);
        assert!(prompt.contains("Writing Task: Methods"));
    }

    #[tokio::test]
    async fn empty_context_still_generates() {
        let client = Scripted::new(Ok("Thin section."));
        let draft = generator(client, Arc::new(TopicEncoder))
            .generate_section(request(Section::Background, &[], &[]))
            .await;
        assert_eq!(draft.text, "Thin section.");
    }
}
