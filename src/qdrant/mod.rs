//! Qdrant-backed vector index.
//!
//! All namespaces share one collection; the namespace string is stored in a keyword-indexed
//! payload field and used as a filter on every query.

pub mod client;
pub mod payload;
pub mod types;

pub use client::QdrantIndex;
pub use payload::compute_chunk_hash;
pub use types::QdrantError;
