//! Plain-text extraction from uploaded papers.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading an uploaded file.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The PDF parser rejected the file.
    #[error("failed to parse PDF {path}: {message}")]
    Pdf {
        /// File that failed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// The extension is not one of `pdf`, `txt`, or `md`.
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),
    /// The blocking extraction task did not complete.
    #[error("extraction task failed: {0}")]
    Task(String),
}

/// Whether `path` has an extension this module can read.
pub fn is_supported(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("pdf" | "txt" | "md"))
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

/// Extract text from `path`, logging any failure and returning an empty string instead.
pub async fn extract_text(path: &Path) -> String {
    match try_extract_text(path).await {
        Ok(text) => text,
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "Text extraction failed");
            String::new()
        }
    }
}

/// Extract text from a PDF, plain-text, or Markdown file.
///
/// PDF text is trimmed line by line with blank lines dropped. Text files are returned as read.
pub async fn try_extract_text(path: &Path) -> Result<String, ExtractError> {
    match extension(path).as_deref() {
        Some("pdf") => {
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || extract_pdf(&owned))
                .await
                .map_err(|error| ExtractError::Task(error.to_string()))?
        }
        Some("txt" | "md") => tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ExtractError::Io {
                path: path.to_path_buf(),
                source,
            }),
        _ => Err(ExtractError::Unsupported(path.to_path_buf())),
    }
}

fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    let raw = pdf_extract::extract_text(path).map_err(|error| ExtractError::Pdf {
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;
    Ok(compact_lines(&raw))
}

fn compact_lines(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
