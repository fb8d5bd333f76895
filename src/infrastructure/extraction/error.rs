//! Extraction error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The document cannot be treated as markup at all. Yields zero records
    /// for the document at the orchestrator boundary, never a crash.
    #[error("malformed document from {url}: {reason}")]
    MalformedDocument { url: String, reason: String },
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;
