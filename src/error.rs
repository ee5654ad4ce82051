//! Pipeline error taxonomy.
//!
//! Every fallible pipeline operation returns [`PipelineError`]. The taxonomy
//! drives retry behavior: provider and storage failures are transient and go
//! back through the retry envelope; content and configuration failures are
//! final and surface immediately. [`PipelineError::is_retryable`] is the
//! single classification point the envelope consults.

use thiserror::Error;

/// Convenience alias for pipeline results.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error taxonomy for the ingestion and retrieval pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Empty or unparseable input. Fatal to the run; never retried.
    #[error("content error: {0}")]
    Content(String),

    /// Embedding or generation endpoint unreachable, or its response was
    /// malformed. Retried per-chunk with backoff.
    #[error("provider error: {0}")]
    Provider(String),

    /// Store query failure (connection exhaustion, server error). Retried
    /// identically to provider errors.
    #[error("storage error: {0}")]
    Storage(String),

    /// Vector length does not match the table's declared dimensionality.
    /// Storage-family, but never retried: the vector will not change length
    /// on a second attempt.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid configuration, unsupported file type, or an uninitialized
    /// store. Fatal; surfaced immediately.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether the retry envelope should attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Provider(_) | PipelineError::Storage(_))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Provider(err.to_string())
    }
}
