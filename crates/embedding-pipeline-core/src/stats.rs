//! Run statistics.
//!
//! [`StatsAggregator`] accumulates counters while a run progresses and
//! produces a single [`ProcessingStats`] summary once it finishes.

use serde::{Deserialize, Serialize};

use crate::models::EmbeddingRecord;
use crate::partition::DateRange;

/// Inclusive date range as ISO-8601 timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsDateRange {
    pub start: String,
    pub end: String,
}

/// Summary of one pipeline run.
///
/// `total_texts_processed`, `total_chunks`, and `total_embeddings` are all
/// the number of embedding records produced; each embedding is one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_texts_processed: usize,
    pub total_chunks: usize,
    pub total_embeddings: usize,
    /// Mean `token_count` over all produced embeddings (0 when none).
    pub average_chunk_size: f64,
    pub processing_time_ms: u64,
    pub services_processed: Vec<String>,
    pub vectors_stored: usize,
    /// Compressed backup size in bytes (0 when no backup was written).
    pub backup_file_size: u64,
    pub backup_key: Option<String>,
    pub objects_processed: usize,
    pub objects_skipped: usize,
    /// Chunks dropped because their embedding batch failed under an
    /// isolating failure policy.
    pub chunks_dropped: usize,
    pub date_range: StatsDateRange,
}

/// Mean token count over a set of embeddings.
pub fn average_chunk_size(records: &[EmbeddingRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let total: usize = records.iter().map(|r| r.metadata.token_count).sum();
    total as f64 / records.len() as f64
}

/// Accumulates counters across a run.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    date_range: DateRange,
    services_processed: Vec<String>,
    objects_processed: usize,
    objects_skipped: usize,
    chunks_dropped: usize,
    vectors_stored: usize,
    backup_key: Option<String>,
    backup_file_size: u64,
}

impl StatsAggregator {
    pub fn new(date_range: DateRange) -> Self {
        Self {
            date_range,
            services_processed: Vec::new(),
            objects_processed: 0,
            objects_skipped: 0,
            chunks_dropped: 0,
            vectors_stored: 0,
            backup_key: None,
            backup_file_size: 0,
        }
    }

    pub fn service_done(&mut self, service: &str) {
        self.services_processed.push(service.to_string());
    }

    pub fn object_processed(&mut self) {
        self.objects_processed += 1;
    }

    pub fn object_skipped(&mut self) {
        self.objects_skipped += 1;
    }

    pub fn chunks_dropped(&mut self, count: usize) {
        self.chunks_dropped += count;
    }

    pub fn vectors_stored(&mut self, count: usize) {
        self.vectors_stored = count;
    }

    pub fn backup(&mut self, key: String, size: u64) {
        self.backup_key = Some(key);
        self.backup_file_size = size;
    }

    /// Produce the final summary for the accumulated embeddings.
    pub fn finish(self, records: &[EmbeddingRecord], processing_time_ms: u64) -> ProcessingStats {
        ProcessingStats {
            total_texts_processed: records.len(),
            total_chunks: records.len(),
            total_embeddings: records.len(),
            average_chunk_size: average_chunk_size(records),
            processing_time_ms,
            services_processed: self.services_processed,
            vectors_stored: self.vectors_stored,
            backup_file_size: self.backup_file_size,
            backup_key: self.backup_key,
            objects_processed: self.objects_processed,
            objects_skipped: self.objects_skipped,
            chunks_dropped: self.chunks_dropped,
            date_range: StatsDateRange {
                start: self.date_range.start_iso(),
                end: self.date_range.end_iso(),
            },
        }
    }
}
