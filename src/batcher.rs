//! Batched embedding of text chunks.
//!
//! Chunks are sent to the [`Embedder`] in groups of at most `batch_size`,
//! in input order, with a fixed pause between consecutive requests to stay
//! under provider rate limits. Each vector is zipped back onto its chunk to
//! produce an [`EmbeddingRecord`].
//!
//! A failed batch either aborts the run ([`FailureIsolation::Abort`], the
//! default) or is dropped with a warning ([`FailureIsolation::Isolate`]).
//! A response whose length differs from the batch, or whose vectors do not
//! match the embedder's declared dimensionality, counts as a failed batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use embedding_pipeline_core::models::{EmbeddingRecord, TextChunk};

use crate::cancel::RunControl;
use crate::config::FailureIsolation;
use crate::embedding::Embedder;
use crate::error::PipelineError;

/// Result of embedding one object's chunks.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub records: Vec<EmbeddingRecord>,
    /// Batches sent to the embedder.
    pub batches: usize,
    /// Chunks lost to isolated batch failures.
    pub chunks_dropped: usize,
}

pub struct EmbeddingBatcher {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    delay: Duration,
    policy: FailureIsolation,
}

impl EmbeddingBatcher {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        delay: Duration,
        policy: FailureIsolation,
    ) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            delay,
            policy,
        }
    }

    /// Embed `chunks`, preserving their order in the output.
    pub async fn embed_all(
        &self,
        chunks: Vec<TextChunk>,
        control: &RunControl,
    ) -> Result<BatchOutcome, PipelineError> {
        let total_batches = chunks.len().div_ceil(self.batch_size);
        let model = self.embedder.model_name().to_string();
        let mut outcome = BatchOutcome {
            records: Vec::with_capacity(chunks.len()),
            ..Default::default()
        };

        let mut remaining = chunks.into_iter();
        loop {
            let batch: Vec<TextChunk> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let batch_no = outcome.batches + 1;
            if batch_no > 1 && !self.delay.is_zero() {
                control.sleep(self.delay).await?;
            }

            tracing::info!(
                batch = batch_no,
                total_batches,
                size = batch.len(),
                "Embedding batch"
            );

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let response = control.guard(self.embedder.embed(&texts)).await?;
            outcome.batches = batch_no;

            match response.and_then(|vectors| self.check_vectors(vectors, batch.len())) {
                Ok(vectors) => {
                    outcome.records.extend(
                        batch
                            .into_iter()
                            .zip(vectors)
                            .map(|(chunk, vector)| EmbeddingRecord::from_chunk(chunk, vector, &model)),
                    );
                }
                Err(source) => match self.policy {
                    FailureIsolation::Abort => {
                        return Err(PipelineError::Embedding {
                            batch: batch_no,
                            source,
                        });
                    }
                    FailureIsolation::Isolate => {
                        tracing::warn!(
                            batch = batch_no,
                            dropped = batch.len(),
                            error = %format!("{:#}", source),
                            "Embedding batch failed; dropping its chunks"
                        );
                        outcome.chunks_dropped += batch.len();
                    }
                },
            }
        }

        Ok(outcome)
    }

    fn check_vectors(&self, vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected {
            bail!(
                "embedding response has {} vectors for {} texts",
                vectors.len(),
                expected
            );
        }
        if let Some(dims) = self.embedder.dims() {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                bail!(
                    "embedding has {} dimensions, expected {}",
                    bad.len(),
                    dims
                );
            }
        }
        Ok(vectors)
    }
}
