//! Saved reviews keyed by prompt id.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;

/// Errors raised by history stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// A review is already saved under this prompt id.
    #[error("a review is already saved for prompt {0}")]
    Duplicate(i64),
    /// No review is saved under this prompt id.
    #[error("no review saved for prompt {0}")]
    NotFound(i64),
    /// The backing store failed.
    #[error("history backend error: {0}")]
    Backend(String),
}

/// Review to save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryEntry {
    /// Owner of the review.
    pub user_id: i64,
    /// Caller-chosen identifier of the prompt.
    pub prompt_id: i64,
    /// Review question.
    pub prompt: String,
    /// Composed review text.
    pub systematic_review: String,
}

/// A saved review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Owner of the review.
    pub user_id: i64,
    /// Caller-chosen identifier of the prompt.
    pub prompt_id: i64,
    /// Review question.
    pub prompt: String,
    /// Composed review text.
    pub systematic_review: String,
    /// RFC 3339 save time.
    pub created_at: String,
}

/// Persistence for generated reviews.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Save a review; prompt ids are unique.
    async fn save(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, HistoryError>;

    /// Fetch the review saved under `prompt_id`.
    async fn get(&self, prompt_id: i64) -> Result<HistoryEntry, HistoryError>;

    /// Reviews saved by `user_id`, newest first.
    async fn list_for_user(&self, user_id: i64) -> Result<Vec<HistoryEntry>, HistoryError>;

    /// Remove the review saved under `prompt_id`.
    async fn delete(&self, prompt_id: i64) -> Result<(), HistoryError>;
}

/// Process-local history store.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: RwLock<HashMap<i64, (u64, HistoryEntry)>>,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, HistoryError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.prompt_id) {
            return Err(HistoryError::Duplicate(entry.prompt_id));
        }
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|error| HistoryError::Backend(error.to_string()))?;
        let saved = HistoryEntry {
            user_id: entry.user_id,
            prompt_id: entry.prompt_id,
            prompt: entry.prompt,
            systematic_review: entry.systematic_review,
            created_at,
        };
        let sequence = self
            .next_sequence
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        entries.insert(saved.prompt_id, (sequence, saved.clone()));
        tracing::debug!(prompt_id = saved.prompt_id, user_id = saved.user_id, "Saved review");
        Ok(saved)
    }

    async fn get(&self, prompt_id: i64) -> Result<HistoryEntry, HistoryError> {
        self.entries
            .read()
            .await
            .get(&prompt_id)
            .map(|(_, entry)| entry.clone())
            .ok_or(HistoryError::NotFound(prompt_id))
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<HistoryEntry>, HistoryError> {
        let entries = self.entries.read().await;
        let mut owned: Vec<&(u64, HistoryEntry)> = entries
            .values()
            .filter(|(_, entry)| entry.user_id == user_id)
            .collect();
        owned.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(owned.into_iter().map(|(_, entry)| entry.clone()).collect())
    }

    async fn delete(&self, prompt_id: i64) -> Result<(), HistoryError> {
        match self.entries.write().await.remove(&prompt_id) {
            Some(_) => Ok(()),
            None => Err(HistoryError::NotFound(prompt_id)),
        }
    }
}
