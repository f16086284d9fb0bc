//! Sequential five-section review generation.
//!
//! Sections are written in canonical order. The partially built [`Review`] is the only
//! continuity state: each step reads the sections written so far, truncates them, and returns
//! a new review with one more section.

use super::generator::{SectionDraft, SectionGenerator, SectionRequest};
use super::prompts::section_instructions;
use super::retrieval::RetrievalService;
use super::{Section, truncate_chars};
use crate::metrics::PipelineMetrics;
use crate::store::PaperId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A review under construction or finished, keyed by section in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Review {
    sections: BTreeMap<Section, SectionDraft>,
}

impl Review {
    /// Return this review with `draft` recorded under its section.
    pub fn with_section(mut self, draft: SectionDraft) -> Self {
        self.sections.insert(draft.section, draft);
        self
    }

    /// Draft for `section`, if it has been written.
    pub fn get(&self, section: Section) -> Option<&SectionDraft> {
        self.sections.get(&section)
    }

    /// Text for `section`; empty when missing or failed.
    pub fn text(&self, section: Section) -> &str {
        self.get(section).map(|draft| draft.text.as_str()).unwrap_or("")
    }

    /// Written drafts in canonical order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionDraft> {
        self.sections.values()
    }

    /// Number of sections that failed to generate.
    pub fn failed_sections(&self) -> usize {
        self.sections.values().filter(|draft| draft.is_failed()).count()
    }

    /// The five section texts in canonical order, one newline apart.
    pub fn compose(&self) -> String {
        Section::ALL
            .iter()
            .map(|section| self.text(*section))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Written sections in canonical order, each cut to at most `limit` characters. Failed
/// sections keep their empty entry.
pub fn fixed_limit_previous_sections(review: &Review, limit: usize) -> Vec<String> {
    review
        .sections()
        .map(|draft| truncate_chars(&draft.text, limit).to_string())
        .collect()
}

/// Per-review knobs.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    /// Neighbours requested from each paper per section.
    pub top_k: usize,
    /// Retrieved chunks placed in each section prompt.
    pub chunk_budget: usize,
    /// Character cap applied to each earlier section in the context.
    pub previous_section_char_limit: usize,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            top_k: 50,
            chunk_budget: 30,
            previous_section_char_limit: 2000,
        }
    }
}

/// Drives retrieval and generation across the five sections.
pub struct ReviewOrchestrator {
    retrieval: RetrievalService,
    generator: SectionGenerator,
    options: OrchestratorOptions,
    metrics: Arc<PipelineMetrics>,
}

impl ReviewOrchestrator {
    /// Wire the orchestrator to its collaborators.
    pub fn new(
        retrieval: RetrievalService,
        generator: SectionGenerator,
        options: OrchestratorOptions,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            retrieval,
            generator,
            options,
            metrics,
        }
    }

    /// Retrieval service used for each section.
    pub fn retrieval(&self) -> &RetrievalService {
        &self.retrieval
    }

    /// Write all five sections for `query`.
    ///
    /// `None` discovers papers from the index once, up front. Retrieval errors leave a section
    /// with empty context and failed generations leave it empty; neither stops the review.
    pub async fn generate_review(&self, query: &str, paper_ids: Option<Vec<PaperId>>) -> Review {
        let papers = match paper_ids {
            Some(papers) => papers,
            None => match self.retrieval.discover_papers().await {
                Ok(papers) => papers,
                Err(error) => {
                    tracing::warn!(error = %error, "Paper discovery failed; generating without context");
                    Vec::new()
                }
            },
        };
        tracing::info!(papers = papers.len(), "Generating review");

        let mut review = Review::default();
        for section in Section::ALL {
            review = self.write_section(review, query, &papers, section).await;
        }

        let failed = review.failed_sections();
        self.metrics.record_review(failed as u64);
        tracing::info!(failed_sections = failed, "Review generated");
        review
    }

    async fn write_section(&self, review: Review, query: &str, papers: &[PaperId], section: Section) -> Review {
        let retrieved = match self
            .retrieval
            .retrieve(query, Some(papers), section, self.options.top_k)
            .await
        {
            Ok(texts) => texts,
            Err(error) => {
                tracing::warn!(section = %section, error = %error, "Retrieval failed; writing section without context");
                Vec::new()
            }
        };
        let previous = fixed_limit_previous_sections(&review, self.options.previous_section_char_limit);

        let draft = self
            .generator
            .generate_section(SectionRequest {
                section,
                query,
                retrieved: &retrieved,
                previous_sections: &previous,
                instructions: section_instructions(section),
                chunk_budget: self.options.chunk_budget,
            })
            .await;
        tracing::info!(
            section = %section,
            chars = draft.text.chars().count(),
            failed = draft.is_failed(),
            "Section written"
        );
        review.with_section(draft)
    }
}
