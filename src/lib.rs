#![deny(missing_docs)]

//! Section-aware retrieval-augmented generation of systematic reviews.
//!
//! Papers are normalized, chunked, classified into one of five review sections, and stored in
//! per-`(paper, section)` namespaces of a vector index. Reviews are then written section by
//! section from retrieved chunks and the sections already written.

/// HTTP routing and REST handlers.
pub mod api;
/// Text-generation client abstraction and adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Text extraction from uploaded files.
pub mod extract;
/// Saved review history.
pub mod history;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Text normalization and chunking.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Classification, ingestion, retrieval, and section generation.
pub mod review;
/// Service facade shared by the HTTP API and the CLI.
pub mod service;
/// Vector index abstraction, namespaces, and the in-memory index.
pub mod store;
