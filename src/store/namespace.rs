//! Composite `(paper, section)` keys and their flat namespace encoding.
//!
//! The core only handles [`NamespaceKey`] values. The `systematic_review/{paper_id}/{section}`
//! string exists at the index adapters, which call [`NamespaceKey::to_namespace`] and
//! [`NamespaceKey::parse`].

use crate::review::Section;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// First path segment of every namespace owned by this pipeline.
pub const NAMESPACE_ROOT: &str = "systematic_review";

/// Rejected paper identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPaperId {
    /// Identifier was empty after trimming.
    #[error("paper id must not be empty")]
    Empty,
    /// Identifier would break the namespace path encoding.
    #[error("paper id '{0}' must not contain '/'")]
    ContainsSlash(String),
}

/// Identifier of one paper within a review session, usually the uploaded file's stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaperId(String);

impl PaperId {
    /// Validate and wrap a paper identifier. Surrounding whitespace is trimmed.
    pub fn new(value: impl AsRef<str>) -> Result<Self, InvalidPaperId> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(InvalidPaperId::Empty);
        }
        if trimmed.contains('/') {
            return Err(InvalidPaperId::ContainsSlash(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic record id for the chunk at `ordinal`.
    pub fn chunk_record_id(&self, ordinal: usize) -> String {
        format!("{}-chunk-{ordinal}", self.0)
    }
}

impl TryFrom<String> for PaperId {
    type Error = InvalidPaperId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PaperId> for String {
    fn from(value: PaperId) -> Self {
        value.0
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Partition of the vector index holding one paper's chunks for one section.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespaceKey {
    /// Paper the vectors were extracted from.
    pub paper_id: PaperId,
    /// Section every vector in the partition was classified into.
    pub section: Section,
}

impl NamespaceKey {
    /// Pair a paper with a section.
    pub fn new(paper_id: PaperId, section: Section) -> Self {
        Self { paper_id, section }
    }

    /// Encode as `systematic_review/{paper_id}/{section}`.
    pub fn to_namespace(&self) -> String {
        format!("{NAMESPACE_ROOT}/{}/{}", self.paper_id, self.section)
    }

    /// Decode a namespace string. Anything other than exactly three segments under
    /// [`NAMESPACE_ROOT`] with a valid paper id and section label yields `None`.
    pub fn parse(namespace: &str) -> Option<Self> {
        let mut segments = namespace.split('/');
        let root = segments.next()?;
        let paper = segments.next()?;
        let section = segments.next()?;
        if root != NAMESPACE_ROOT || segments.next().is_some() || paper.trim() != paper {
            return None;
        }
        Some(Self {
            paper_id: PaperId::new(paper).ok()?,
            section: section.parse().ok()?,
        })
    }
}

impl fmt::Display for NamespaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_namespace())
    }
}
