//! The orchestrator.
//!
//! [`Pipeline::run`] drives one batch run end to end:
//!
//! ```text
//! START
//!   → resolve eligible users (when consent filtering is on)
//!   → for each service, for each day prefix, for each object:
//!         fetch → parse → consent filter → extract/chunk
//!         → embed the object's chunks in rate-limited batches
//!   → write all records to the vector store (unless s3-only)
//!   → write the backup archive (when enabled)
//!   → finalize stats
//! DONE
//! ```
//!
//! Work is strictly sequential: services in configured order, prefixes in
//! date order, objects in listing order, batches in chunk order. Batch
//! numbers and the inter-batch delay are per object.
//!
//! # Failure handling
//!
//! | Failure | Default | Override |
//! |---------|---------|----------|
//! | malformed log line | dropped with a warning | none |
//! | prefix listing | run aborts | `listing = "isolate"` skips the prefix |
//! | object fetch, decode, or extraction | object skipped | `objects = "abort"` aborts |
//! | embedding batch | run aborts | `embedding_batches = "isolate"` drops the batch |
//! | consent lookup, vector store, backup upload | run aborts | none |
//!
//! Cancellation and deadline expiry always abort, never count as a skipped
//! object.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::NaiveDate;
use embedding_pipeline_core::chunk::ChunkSplitter;
use embedding_pipeline_core::consent::ConsentFilter;
use embedding_pipeline_core::extract::ExtractorRegistry;
use embedding_pipeline_core::models::{EmbeddingRecord, TextChunk};
use embedding_pipeline_core::parse::parse_log_lines;
use embedding_pipeline_core::partition::{partition_prefixes, DateRange};
use embedding_pipeline_core::stats::{ProcessingStats, StatsAggregator};
use embedding_pipeline_core::tokenize::Tokenizer;

use crate::backup::BackupArchiver;
use crate::batcher::EmbeddingBatcher;
use crate::cancel::RunControl;
use crate::config::{Config, FailureIsolation, ProcessingConfig, VectorStoreMode};
use crate::consent::{ConsentSource, FileConsentSource, StaticConsentSource};
use crate::embedding::{create_embedder, Embedder};
use crate::error::PipelineError;
use crate::fetch::fetch_log;
use crate::object_store::s3::S3Store;
use crate::object_store::{list_all, ObjectStore};
use crate::tokenizer::create_tokenizer;
use crate::vector_store::{create_sink, VectorSink};

/// Everything a run talks to, injected so tests can substitute fakes.
pub struct PipelineDeps {
    pub store: Arc<dyn ObjectStore>,
    pub embedder: Arc<dyn Embedder>,
    /// Required unless the vector-store mode is `s3-only`.
    pub sink: Option<Arc<dyn VectorSink>>,
    pub consent: Arc<dyn ConsentSource>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub extractors: ExtractorRegistry,
}

impl PipelineDeps {
    /// Build the production adapters described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(S3Store::from_config(&config.storage)?);
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        let sink = create_sink(config.pipeline.vector_store, config.vector_store.as_ref())?;
        let consent: Arc<dyn ConsentSource> = match config.consent {
            Some(ref c) => Arc::new(FileConsentSource::new(&c.eligible_users_path)),
            None => Arc::new(StaticConsentSource::default()),
        };
        let tokenizer = create_tokenizer(&config.pipeline)?;

        Ok(Self {
            store,
            embedder,
            sink,
            consent,
            tokenizer,
            extractors: ExtractorRegistry::with_defaults(),
        })
    }
}

pub struct Pipeline {
    config: ProcessingConfig,
    deps: PipelineDeps,
    splitter: ChunkSplitter,
    batcher: EmbeddingBatcher,
    control: RunControl,
}

impl Pipeline {
    /// # Errors
    ///
    /// Fails on an invalid chunk size/overlap pair, or when a vector store
    /// mode other than `s3-only` is configured without a sink.
    pub fn new(config: ProcessingConfig, deps: PipelineDeps, control: RunControl) -> Result<Self> {
        let splitter = ChunkSplitter::new(
            deps.tokenizer.clone(),
            config.chunk_size,
            config.chunk_overlap,
        )?;
        if config.vector_store != VectorStoreMode::S3Only && deps.sink.is_none() {
            bail!(
                "vector store mode '{}' needs a vector sink",
                config.vector_store.as_str()
            );
        }
        let batcher = EmbeddingBatcher::new(
            deps.embedder.clone(),
            config.batch_size,
            Duration::from_millis(config.batch_delay_ms),
            config.failure_policy.embedding_batches,
        );
        Ok(Self {
            config,
            deps,
            splitter,
            batcher,
            control,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Run the pipeline once over the configured date range.
    pub async fn run(&self) -> Result<ProcessingStats, PipelineError> {
        let started = Instant::now();
        let range = self.config.date_range;
        let mut stats = StatsAggregator::new(range);

        tracing::info!(
            bucket = %self.config.bucket,
            region = %self.config.region,
            start = %range.start,
            end = %range.end,
            services = ?self.config.services,
            model = %self.config.embedding_model,
            tokenizer = self.deps.tokenizer.name(),
            "Starting embedding run"
        );

        let consent = self.consent_filter().await?;

        let mut records = Vec::new();
        for service in &self.config.services {
            tracing::info!(service = %service, "Processing service");
            let before = records.len();
            self.process_service(service, &consent, &mut records, &mut stats)
                .await?;
            tracing::info!(
                service = %service,
                embeddings = records.len() - before,
                "Service done"
            );
            stats.service_done(service);
        }

        if self.config.vector_store != VectorStoreMode::S3Only {
            if let Some(ref sink) = self.deps.sink {
                let written = self
                    .control
                    .guard(sink.store(&records))
                    .await?
                    .map_err(PipelineError::VectorStore)?;
                tracing::info!(sink = sink.name(), written, "Stored embeddings");
                stats.vectors_stored(written);
            }
        }

        if self.config.backup_to_store {
            let archiver = BackupArchiver::new(
                self.deps.store.as_ref(),
                &self.config.output_path,
                &self.config.embedding_model,
            );
            let key = self
                .control
                .guard(archiver.archive(&records))
                .await?
                .map_err(PipelineError::Backup)?;

            let size = match self.control.guard(self.deps.store.object_size(&key)).await? {
                Ok(size) => size.unwrap_or(0),
                Err(e) => {
                    tracing::warn!(key = %key, error = %format!("{:#}", e), "Failed to get backup size");
                    0
                }
            };
            stats.backup(key, size);
        }

        let summary = stats.finish(&records, started.elapsed().as_millis() as u64);
        tracing::info!(
            embeddings = summary.total_embeddings,
            average_chunk_size = summary.average_chunk_size,
            vectors_stored = summary.vectors_stored,
            objects_processed = summary.objects_processed,
            objects_skipped = summary.objects_skipped,
            chunks_dropped = summary.chunks_dropped,
            elapsed_ms = summary.processing_time_ms,
            "Embedding run completed"
        );
        Ok(summary)
    }

    async fn consent_filter(&self) -> Result<ConsentFilter, PipelineError> {
        if !self.config.filter_by_consent {
            return Ok(ConsentFilter::disabled());
        }
        let eligible = self
            .control
            .guard(self.deps.consent.eligible_user_ids())
            .await?
            .map_err(PipelineError::Consent)?;
        tracing::info!(eligible = eligible.len(), "Resolved consent-eligible users");
        Ok(ConsentFilter::with_eligible(eligible))
    }

    /// Process every object of `service` in the date range, appending the
    /// embedded chunks to `records`.
    async fn process_service(
        &self,
        service: &str,
        consent: &ConsentFilter,
        records: &mut Vec<EmbeddingRecord>,
        stats: &mut StatsAggregator,
    ) -> Result<(), PipelineError> {
        if !self.deps.extractors.supports(service) {
            tracing::warn!(service, "No extraction rule for service; it yields no text");
            return Ok(());
        }

        let range = self.config.date_range;
        for prefix in partition_prefixes(service, range.start, range.end) {
            let listed = self
                .control
                .guard(list_all(self.deps.store.as_ref(), &prefix))
                .await?;
            let objects = match listed {
                Ok(objects) => objects,
                Err(source) => match self.config.failure_policy.listing {
                    FailureIsolation::Abort => {
                        return Err(PipelineError::Listing { prefix, source });
                    }
                    FailureIsolation::Isolate => {
                        tracing::warn!(
                            prefix = %prefix,
                            error = %format!("{:#}", source),
                            "Failed to list prefix; skipping it"
                        );
                        continue;
                    }
                },
            };
            tracing::debug!(prefix = %prefix, objects = objects.len(), "Listed prefix");

            for object in objects {
                let chunks = match self.process_object(service, &object.key, consent).await {
                    Ok(chunks) => {
                        stats.object_processed();
                        chunks
                    }
                    Err(e) if e.is_interrupted() => return Err(e),
                    Err(e) => match self.config.failure_policy.objects {
                        FailureIsolation::Abort => return Err(e),
                        FailureIsolation::Isolate => {
                            tracing::warn!(
                                key = %object.key,
                                error = %format!("{:#}", anyhow::Error::from(e)),
                                "Failed to process object; skipping it"
                            );
                            stats.object_skipped();
                            continue;
                        }
                    },
                };

                // Embedding failures are never treated as object failures.
                let outcome = self.batcher.embed_all(chunks, &self.control).await?;
                if outcome.batches > 0 {
                    tracing::debug!(
                        key = %object.key,
                        batches = outcome.batches,
                        embeddings = outcome.records.len(),
                        "Embedded object"
                    );
                }
                stats.chunks_dropped(outcome.chunks_dropped);
                records.extend(outcome.records);
            }
        }

        Ok(())
    }

    async fn process_object(
        &self,
        service: &str,
        key: &str,
        consent: &ConsentFilter,
    ) -> Result<Vec<TextChunk>, PipelineError> {
        let object_error = |source| PipelineError::Object {
            key: key.to_string(),
            source,
        };

        let body = self
            .control
            .guard(fetch_log(self.deps.store.as_ref(), key))
            .await?
            .map_err(object_error)?;

        let parsed = parse_log_lines(&body);
        let total = parsed.records.len();

        let mut chunks = Vec::new();
        let mut allowed = 0;
        for record in parsed.records.iter().filter(|r| consent.allows(r)) {
            allowed += 1;
            let extracted = self
                .deps
                .extractors
                .extract(service, record, &self.splitter)
                .map_err(object_error)?;
            chunks.extend(extracted);
        }

        tracing::debug!(
            key,
            records = total,
            skipped_lines = parsed.skipped_lines,
            filtered = total - allowed,
            chunks = chunks.len(),
            "Processed object"
        );
        Ok(chunks)
    }
}

/// Run over an explicit inclusive date range.
pub async fn run_date_range(
    config: &Config,
    deps: PipelineDeps,
    range: DateRange,
    control: RunControl,
) -> Result<ProcessingStats, PipelineError> {
    let pipeline = Pipeline::new(config.processing(range), deps, control)
        .map_err(PipelineError::Setup)?;
    pipeline.run().await
}

/// Run over the `days` days ending yesterday (relative to `today`).
pub async fn run_last_days(
    config: &Config,
    deps: PipelineDeps,
    days: u32,
    today: NaiveDate,
    control: RunControl,
) -> Result<ProcessingStats, PipelineError> {
    let range = DateRange::last_days(today, days).ok_or_else(|| {
        PipelineError::InvalidDateRange(format!("days must be at least 1 (got {})", days))
    })?;
    run_date_range(config, deps, range, control).await
}
