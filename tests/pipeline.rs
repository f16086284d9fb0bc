use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use sysreview::completion::{CompletionClient, CompletionClientError};
use sysreview::config::LengthUnit;
use sysreview::embedding::{EmbeddingClient, HashingEmbeddingClient};
use sysreview::metrics::PipelineMetrics;
use sysreview::processing::{TextChunker, TextNormalizer};
use sysreview::review::{
    IngestionOptions, IngestionService, OrchestratorOptions, RetrievalService, ReviewOrchestrator, Section,
    SectionClassifier, SectionGenerator, StoredSectionPolicy,
};
use sysreview::store::{MemoryIndex, PaperId, VectorIndex};

const CLASSIFY_MARKER: &str = "---TEXT---";

fn section_of(prompt: &str) -> Option<Section> {
    Section::ALL
        .into_iter()
        .find(|section| prompt.starts_with(&format!("# Systematic Review Writing Task: {section}\n")))
}

/// Context block of a section prompt: the second fenced block.
fn context_of(prompt: &str) -> &str {
    prompt.split("```").nth(3).unwrap_or_default().trim()
}

/// Labels every chunk as Background and writes a fixed sentence per section.
struct FixedModel;

#[async_trait]
impl CompletionClient for FixedModel {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionClientError> {
        if prompt.contains(CLASSIFY_MARKER) {
            return Ok("Background".into());
        }
        let section = section_of(prompt)
            .ok_or_else(|| CompletionClientError::GenerationFailed("unexpected prompt".into()))?;
        Ok(format!("{section} findings for the review."))
    }
}

/// Echoes each section's context, or writes `background` for the first section when set.
struct EchoModel {
    background: Option<String>,
}

#[async_trait]
impl CompletionClient for EchoModel {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionClientError> {
        if prompt.contains(CLASSIFY_MARKER) {
            return Ok("Background".into());
        }
        match section_of(prompt) {
            Some(Section::Background) if self.background.is_some() => {
                Ok(self.background.clone().unwrap_or_default())
            }
            Some(section) => Ok(format!("{section} context:\n{}", context_of(prompt))),
            None => Err(CompletionClientError::GenerationFailed("unexpected prompt".into())),
        }
    }
}

struct Pipeline {
    index: Arc<MemoryIndex>,
    ingestion: IngestionService,
    orchestrator: ReviewOrchestrator,
    metrics: Arc<PipelineMetrics>,
}

fn pipeline(model: Arc<dyn CompletionClient>) -> Pipeline {
    let index = Arc::new(MemoryIndex::new());
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(HashingEmbeddingClient::new(32));
    let metrics = Arc::new(PipelineMetrics::new());
    let dyn_index: Arc<dyn VectorIndex> = index.clone();

    let ingestion = IngestionService::new(
        SectionClassifier::new(Arc::clone(&model)),
        Arc::clone(&embedder),
        Arc::clone(&dyn_index),
        TextNormalizer::new().expect("normalizer"),
        TextChunker::new(LengthUnit::Chars).expect("chunker"),
        IngestionOptions {
            chunk_size: 500,
            chunk_overlap: 50,
            concurrency: 4,
            policy: StoredSectionPolicy::SkipPopulatedSections,
            poll_retries: 3,
            poll_delay: Duration::ZERO,
        },
        Arc::clone(&metrics),
    );
    let retrieval = RetrievalService::new(Arc::clone(&embedder), dyn_index, 4, None);
    let generator = SectionGenerator::new(model, None);
    let orchestrator = ReviewOrchestrator::new(
        retrieval,
        generator,
        OrchestratorOptions::default(),
        Arc::clone(&metrics),
    );

    Pipeline {
        index,
        ingestion,
        orchestrator,
        metrics,
    }
}

fn paper(id: &str) -> PaperId {
    PaperId::new(id).expect("paper id")
}

#[tokio::test]
async fn two_papers_produce_a_five_section_review_in_order() {
    let pipeline = pipeline(Arc::new(FixedModel));
    for (id, text) in [
        ("trial-a", "Exercise improved mood in adults."),
        ("trial-b", "Walking reduced anxiety scores."),
    ] {
        let report = pipeline.ingestion.ingest(&paper(id), vec![text.to_string()]).await;
        assert_eq!(report.stored, 1);
        assert!(report.converged);
        assert_eq!(report.sections.get(&Section::Background), Some(&1));
    }

    let review = pipeline
        .orchestrator
        .generate_review("Does exercise improve mental health?", None)
        .await;
    let text = review.compose();

    let mut cursor = 0;
    for section in Section::ALL {
        let at = text[cursor..]
            .find(section.as_str())
            .map(|offset| cursor + offset)
            .unwrap_or_else(|| panic!("{section} missing or out of order in {text:?}"));
        cursor = at + section.as_str().len();
    }

    let ceiling: usize = Section::ALL.iter().map(|section| section.char_ceiling()).sum();
    assert!(text.chars().count() <= ceiling + Section::ALL.len() - 1);
    assert_eq!(review.failed_sections(), 0);

    let snapshot = pipeline.metrics.snapshot();
    assert_eq!(snapshot.papers_ingested, 2);
    assert_eq!(snapshot.chunks_stored, 2);
    assert_eq!(snapshot.reviews_generated, 1);
}

#[tokio::test]
async fn later_sections_see_truncated_earlier_sections() {
    let background = "b".repeat(3000);
    let pipeline = pipeline(Arc::new(EchoModel {
        background: Some(background.clone()),
    }));
    pipeline
        .ingestion
        .ingest(&paper("trial-a"), vec!["Exercise improved mood in adults.".into()])
        .await;

    let review = pipeline
        .orchestrator
        .generate_review("Does exercise improve mental health?", Some(vec![paper("trial-a")]))
        .await;

    assert_eq!(review.text(Section::Background), background);
    let methods = review.text(Section::Methods);
    assert!(methods.starts_with("Methods context:"));
    assert!(methods.contains(&"b".repeat(2000)));
    assert!(!methods.contains(&"b".repeat(2001)));

    // Methods queries its own namespace, which holds nothing for this paper.
    assert!(!methods.contains("Exercise improved mood"));

    let results = review.text(Section::Results);
    assert!(results.contains("Methods context:"));
}

#[tokio::test]
async fn retrieved_chunks_reach_the_section_prompt() {
    let pipeline = pipeline(Arc::new(EchoModel { background: None }));
    pipeline
        .ingestion
        .ingest(&paper("trial-a"), vec!["Exercise improved mood in adults.".into()])
        .await;

    let review = pipeline
        .orchestrator
        .generate_review("q", Some(vec![paper("trial-a")]))
        .await;
    assert_eq!(
        review.text(Section::Background),
        "Background context:\nExercise improved mood in adults."
    );
    assert!(review.text(Section::Methods).contains("Exercise improved mood in adults."));
}

#[tokio::test]
async fn re_ingestion_stores_nothing_new() {
    let pipeline = pipeline(Arc::new(FixedModel));
    let chunks = vec!["Exercise improved mood in adults.".to_string()];

    let first = pipeline.ingestion.ingest(&paper("trial-a"), chunks.clone()).await;
    let second = pipeline.ingestion.ingest(&paper("trial-a"), chunks).await;

    assert_eq!(first.stored, 1);
    assert_eq!(second.stored, 0);
    assert_eq!(second.skipped, 1);
    let stats = pipeline.index.describe_stats().await.expect("stats");
    assert_eq!(stats.vectors_for(&paper("trial-a")), 1);
}

#[tokio::test]
async fn review_without_papers_still_has_every_section() {
    let pipeline = pipeline(Arc::new(FixedModel));
    let review = pipeline.orchestrator.generate_review("q", Some(Vec::new())).await;

    for section in Section::ALL {
        assert_eq!(review.text(section), format!("{section} findings for the review."));
    }
    let retrieved = pipeline
        .orchestrator
        .retrieval()
        .retrieve("q", Some(&[]), Section::Results, 50)
        .await
        .expect("retrieve");
    assert!(retrieved.is_empty());
}
