//! Errors that end a pipeline run.
//!
//! Per-line and (by default) per-object failures never surface here; they
//! are logged and skipped. Everything in [`PipelineError`] aborts the run
//! and carries the originating error as its `source`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to resolve consent-eligible users")]
    Consent(#[source] anyhow::Error),

    #[error("failed to list objects under {prefix}")]
    Listing {
        prefix: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to process object {key}")]
    Object {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("embedding batch {batch} failed")]
    Embedding {
        batch: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to write embeddings to the vector store")]
    VectorStore(#[source] anyhow::Error),

    #[error("failed to write the embeddings backup")]
    Backup(#[source] anyhow::Error),

    #[error("failed to set up the pipeline")]
    Setup(#[source] anyhow::Error),

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("run deadline exceeded")]
    DeadlineExceeded,
}

impl PipelineError {
    /// True for cancellation and deadline expiry.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, PipelineError::Cancelled | PipelineError::DeadlineExceeded)
    }
}
