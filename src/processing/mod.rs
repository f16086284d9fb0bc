//! Text preparation: cleanup of extracted text and boundary-aware chunking.

pub mod chunking;
pub mod normalize;

pub use chunking::{ChunkingError, TextChunker, TokenCounter};
pub use normalize::TextNormalizer;
