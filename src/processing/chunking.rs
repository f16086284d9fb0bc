//! Boundary-aware recursive chunking.
//!
//! Text is split at the highest-priority boundary it contains (blank line, newline, then
//! sentence punctuation). Pieces shorter than the budget are greedily merged into chunks with a
//! sliding overlap; pieces that are still too long are split again at the next boundary. A
//! piece with no boundary left is emitted whole even when it exceeds the budget.
//!
//! Separators stay attached to the end of the piece they close, so every piece is a contiguous
//! byte range of the input and a chunk is simply the range from its first to its last piece.

use crate::config::LengthUnit;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::cl100k_base;

/// Measures the length of a span in the configured unit.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Boundaries in priority order.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ".", "?", "!"];

/// Errors produced while configuring or running the chunker.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A chunk budget of zero can never be satisfied.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must leave room for new text in each chunk.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge {
        /// Requested overlap.
        overlap: usize,
        /// Requested chunk size.
        chunk_size: usize,
    },
    /// The tokenizer backing [`LengthUnit::Tokens`] could not be loaded.
    #[error("failed to initialize tokenizer '{encoding}': {message}")]
    Tokenizer {
        /// Encoding we attempted to load.
        encoding: &'static str,
        /// Message reported by the tokenizer library.
        message: String,
    },
}

/// Splits normalized text into overlapping chunks of bounded length.
#[derive(Clone)]
pub struct TextChunker {
    counter: TokenCounter,
    separators: Vec<&'static str>,
}

impl std::fmt::Debug for TextChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextChunker")
            .field("separators", &self.separators)
            .finish_non_exhaustive()
    }
}

impl TextChunker {
    /// Build a chunker measuring length in `unit`.
    pub fn new(unit: LengthUnit) -> Result<Self, ChunkingError> {
        Ok(Self::with_counter(build_token_counter(unit)?))
    }

    /// Build a chunker around a custom length function.
    pub fn with_counter(counter: TokenCounter) -> Self {
        Self {
            counter,
            separators: DEFAULT_SEPARATORS.to_vec(),
        }
    }

    /// Split `text` into chunks of at most `chunk_size` units with `overlap` units shared
    /// between neighbours.
    ///
    /// Returns an empty vector when the text is empty or all whitespace.
    pub fn chunk(
        &self,
        text: &str,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<String>, ChunkingError> {
        Ok(self
            .chunk_spans(text, chunk_size, overlap)?
            .into_iter()
            .map(|span| text[span].to_string())
            .collect())
    }

    /// Byte ranges of the chunks [`TextChunker::chunk`] would return, in document order.
    pub fn chunk_spans(
        &self,
        text: &str,
        chunk_size: usize,
        overlap: usize,
    ) -> Result<Vec<Range<usize>>, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                overlap,
                chunk_size,
            });
        }
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let budget = Budget {
            chunk_size,
            overlap,
        };
        let mut spans = Vec::new();
        self.split_range(text, 0..text.len(), &self.separators, budget, &mut spans);
        Ok(spans)
    }

    fn measure(&self, text: &str, span: &Range<usize>) -> usize {
        (self.counter)(&text[span.clone()])
    }

    fn split_range(
        &self,
        text: &str,
        range: Range<usize>,
        separators: &[&'static str],
        budget: Budget,
        spans: &mut Vec<Range<usize>>,
    ) {
        let slice = &text[range.clone()];
        let Some(position) = separators.iter().position(|sep| slice.contains(sep)) else {
            push_trimmed(text, range, spans);
            return;
        };
        let separator = separators[position];
        let remaining = &separators[position + 1..];

        let mut pending: Vec<Range<usize>> = Vec::new();
        for piece in split_keep_separator(slice, separator, range.start) {
            if self.measure(text, &piece) < budget.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                self.merge_pieces(text, &pending, budget, spans);
                pending.clear();
            }
            if remaining.is_empty() {
                push_trimmed(text, piece, spans);
            } else {
                self.split_range(text, piece, remaining, budget, spans);
            }
        }
        if !pending.is_empty() {
            self.merge_pieces(text, &pending, budget, spans);
        }
    }

    /// Greedily merge contiguous pieces, carrying up to `overlap` units into the next chunk.
    fn merge_pieces(
        &self,
        text: &str,
        pieces: &[Range<usize>],
        budget: Budget,
        spans: &mut Vec<Range<usize>>,
    ) {
        let mut window: VecDeque<(Range<usize>, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let length = self.measure(text, piece);
            if total + length > budget.chunk_size && !window.is_empty() {
                push_window(text, &window, spans);
                while total > budget.overlap || (total + length > budget.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }
            window.push_back((piece.clone(), length));
            total += length;
        }

        if !window.is_empty() {
            push_window(text, &window, spans);
        }
    }
}

#[derive(Clone, Copy)]
struct Budget {
    chunk_size: usize,
    overlap: usize,
}

fn split_keep_separator(slice: &str, separator: &str, offset: usize) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = offset;
    for (index, _) in slice.match_indices(separator) {
        let end = offset + index + separator.len();
        pieces.push(start..end);
        start = end;
    }
    if start < offset + slice.len() {
        pieces.push(start..offset + slice.len());
    }
    pieces
}

fn push_window(text: &str, window: &VecDeque<(Range<usize>, usize)>, spans: &mut Vec<Range<usize>>) {
    if let (Some((first, _)), Some((last, _))) = (window.front(), window.back()) {
        push_trimmed(text, first.start..last.end, spans);
    }
}

fn push_trimmed(text: &str, range: Range<usize>, spans: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    let start = range.start + lead;
    spans.push(start..start + trimmed.len());
}

/// Build the length function for `unit`.
pub fn build_token_counter(unit: LengthUnit) -> Result<TokenCounter, ChunkingError> {
    match unit {
        LengthUnit::Chars => Ok(Arc::new(|text: &str| text.chars().count())),
        LengthUnit::Tokens => {
            let bpe = cl100k_base().map_err(|error| ChunkingError::Tokenizer {
                encoding: "cl100k_base",
                message: error.to_string(),
            })?;
            Ok(Arc::new(move |text: &str| bpe.encode_ordinary(text).len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> TextChunker {
        TextChunker::new(LengthUnit::Chars).expect("char counter")
    }

    fn sample() -> String {
        let mut text = String::new();
        for paragraph in 0..6 {
            for sentence in 0..5 {
                text.push_str(&format!(
                    "Paragraph {paragraph} sentence {sentence} reports an outcome. "
                ));
            }
            text.push_str("\n\n");
        }
        text.trim().to_string()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = chunker();
        assert!(chunker.chunk("", 100, 10).expect("chunk").is_empty());
        assert!(chunker.chunk("  \n\n ", 100, 10).expect("chunk").is_empty());
    }

    #[test]
    fn rejects_invalid_budgets() {
        let chunker = chunker();
        assert!(matches!(
            chunker.chunk("text", 0, 0),
            Err(ChunkingError::InvalidChunkSize)
        ));
        assert!(matches!(
            chunker.chunk("text", 10, 10),
            Err(ChunkingError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunker().chunk("One sentence. Another one.", 1500, 300).expect("chunk");
        assert_eq!(chunks, vec!["One sentence. Another one.".to_string()]);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = sample();
        let chunker = chunker();
        let first = chunker.chunk(&text, 200, 40).expect("chunk");
        let second = chunker.chunk(&text, 200, 40).expect("chunk");
        assert_eq!(first, second);
        assert!(first.len() > 1);
    }

    #[test]
    fn chunks_respect_the_budget() {
        let text = sample();
        for chunk in chunker().chunk(&text, 200, 40).expect("chunk") {
            assert!(chunk.chars().count() <= 200, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn every_non_whitespace_byte_is_covered() {
        let text = sample();
        let spans = chunker().chunk_spans(&text, 150, 30).expect("chunk");
        let mut covered = vec![false; text.len()];
        for span in &spans {
            for flag in &mut covered[span.clone()] {
                *flag = true;
            }
        }
        for (index, byte) in text.bytes().enumerate() {
            if !byte.is_ascii_whitespace() {
                assert!(covered[index], "byte {index} ({:?}) lost", byte as char);
            }
        }
        assert!(spans.windows(2).all(|pair| pair[0].start < pair[1].start));
    }

    #[test]
    fn adjacent_chunks_overlap() {
        let text = sample();
        let spans = chunker().chunk_spans(&text, 150, 60).expect("chunk");
        let overlapping = spans
            .windows(2)
            .filter(|pair| pair[1].start < pair[0].end)
            .count();
        assert!(overlapping > 0);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = "Alpha beta gamma.\n\nDelta epsilon zeta.";
        let chunks = chunker().chunk(text, 25, 0).expect("chunk");
        assert_eq!(
            chunks,
            vec!["Alpha beta gamma.".to_string(), "Delta epsilon zeta.".to_string()]
        );
    }

    #[test]
    fn unbreakable_span_is_emitted_whole() {
        let long_word = "x".repeat(80);
        let chunks = chunker().chunk(&long_word, 20, 5).expect("chunk");
        assert_eq!(chunks, vec![long_word]);
    }
}
