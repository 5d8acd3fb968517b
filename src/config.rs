//! TOML configuration parsing and validation.
//!
//! The config file describes where logs live, which services to process,
//! how text is chunked and embedded, and where results go. The date range
//! is supplied per run (see [`ProcessingConfig`]).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use embedding_pipeline_core::partition::DateRange;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_store: Option<VectorStoreConfig>,
    #[serde(default)]
    pub consent: Option<ConsentConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_output_path")]
    pub output_path: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_output_path() -> String {
    "embeddings".to_string()
}

/// Where embeddings are written besides the backup archive.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum VectorStoreMode {
    /// Backup only; no vector database.
    #[serde(rename = "s3-only")]
    S3Only,
    #[serde(rename = "qdrant")]
    Qdrant,
    #[serde(rename = "weaviate")]
    Weaviate,
}

impl VectorStoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorStoreMode::S3Only => "s3-only",
            VectorStoreMode::Qdrant => "qdrant",
            VectorStoreMode::Weaviate => "weaviate",
        }
    }
}

/// Whether a failure in a stage skips the failing unit or aborts the run.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureIsolation {
    /// Log, skip the unit, and continue.
    Isolate,
    /// Propagate and end the run.
    Abort,
}

/// Failure handling for each stage that can fail independently.
///
/// Malformed log lines are always dropped individually. Consent, vector
/// store, and backup failures always abort.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Listing one day prefix.
    #[serde(default = "default_listing_policy")]
    pub listing: FailureIsolation,
    /// Fetching, decompressing, or extracting one object.
    #[serde(default = "default_objects_policy")]
    pub objects: FailureIsolation,
    /// One call to the embedding API.
    #[serde(default = "default_batches_policy")]
    pub embedding_batches: FailureIsolation,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            listing: FailureIsolation::Abort,
            objects: FailureIsolation::Isolate,
            embedding_batches: FailureIsolation::Abort,
        }
    }
}

fn default_listing_policy() -> FailureIsolation {
    FailureIsolation::Abort
}
fn default_objects_policy() -> FailureIsolation {
    FailureIsolation::Isolate
}
fn default_batches_policy() -> FailureIsolation {
    FailureIsolation::Abort
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_vector_store_mode")]
    pub vector_store: VectorStoreMode,
    #[serde(default = "default_true")]
    pub backup_to_store: bool,
    #[serde(default = "default_true")]
    pub filter_by_consent: bool,
    /// `approx`, `words`, or `huggingface`.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    /// Deadline for the whole run, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            services: default_services(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            vector_store: default_vector_store_mode(),
            backup_to_store: true,
            filter_by_consent: true,
            tokenizer: default_tokenizer(),
            tokenizer_path: None,
            timeout_secs: None,
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_services() -> Vec<String> {
    vec![
        "lyfbot-service".to_string(),
        "journal-service".to_string(),
        "chat-service".to_string(),
    ]
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_batch_size() -> usize {
    100
}
fn default_batch_delay_ms() -> u64 {
    100
}
fn default_vector_store_mode() -> VectorStoreMode {
    VectorStoreMode::Qdrant
}
fn default_true() -> bool {
    true
}
fn default_tokenizer() -> String {
    "approx".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama, or an OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_max_retries() -> u32 {
    0
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Environment variable holding the API key, if the store needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Records per upsert request.
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_collection() -> String {
    "embeddings".to_string()
}
fn default_upsert_batch() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsentConfig {
    /// JSON-lines export of user consent records.
    pub eligible_users_path: PathBuf,
}

/// Immutable settings for one run: the file config plus a date range.
#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub bucket: String,
    pub region: String,
    pub output_path: String,
    pub services: Vec<String>,
    pub date_range: DateRange,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub vector_store: VectorStoreMode,
    pub backup_to_store: bool,
    pub filter_by_consent: bool,
    pub failure_policy: FailurePolicy,
}

impl Config {
    /// Freeze the settings for a run over `date_range`.
    pub fn processing(&self, date_range: DateRange) -> ProcessingConfig {
        ProcessingConfig {
            bucket: self.storage.bucket.clone(),
            region: self.storage.region.clone(),
            output_path: self.storage.output_path.trim_end_matches('/').to_string(),
            services: self.pipeline.services.clone(),
            date_range,
            embedding_model: self.embedding.model.clone(),
            chunk_size: self.pipeline.chunk_size,
            chunk_overlap: self.pipeline.chunk_overlap,
            batch_size: self.pipeline.batch_size,
            batch_delay_ms: self.pipeline.batch_delay_ms,
            vector_store: self.pipeline.vector_store,
            backup_to_store: self.pipeline.backup_to_store,
            filter_by_consent: self.pipeline.filter_by_consent,
            failure_policy: self.pipeline.failure_policy,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
///
/// `DATA_LAKE_BUCKET_NAME` and `AWS_REGION` override the storage section.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Ok(bucket) = std::env::var("DATA_LAKE_BUCKET_NAME") {
        if !bucket.is_empty() {
            config.storage.bucket = bucket;
        }
    }
    if let Ok(region) = std::env::var("AWS_REGION") {
        if !region.is_empty() {
            config.storage.region = region;
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.bucket.is_empty() {
        bail!("storage.bucket must not be empty");
    }

    let pipeline = &config.pipeline;
    if pipeline.services.is_empty() {
        bail!("pipeline.services must list at least one service");
    }
    if pipeline.chunk_size == 0 {
        bail!("pipeline.chunk_size must be > 0");
    }
    if pipeline.chunk_overlap >= pipeline.chunk_size {
        bail!(
            "pipeline.chunk_overlap ({}) must be smaller than pipeline.chunk_size ({})",
            pipeline.chunk_overlap,
            pipeline.chunk_size
        );
    }
    if pipeline.batch_size == 0 {
        bail!("pipeline.batch_size must be > 0");
    }

    match pipeline.tokenizer.as_str() {
        "approx" | "words" => {}
        "huggingface" => {
            if pipeline.tokenizer_path.is_none() {
                bail!("pipeline.tokenizer_path is required when tokenizer = 'huggingface'");
            }
        }
        other => bail!(
            "Unknown tokenizer: '{}'. Must be approx, words, or huggingface.",
            other
        ),
    }

    if pipeline.vector_store != VectorStoreMode::S3Only {
        match &config.vector_store {
            Some(vs) if vs.upsert_batch_size == 0 => {
                bail!("vector_store.upsert_batch_size must be > 0")
            }
            Some(_) => {}
            None => bail!(
                "[vector_store] section required when pipeline.vector_store = '{}'",
                pipeline.vector_store.as_str()
            ),
        }
    }

    if pipeline.filter_by_consent && config.consent.is_none() {
        bail!("[consent] section required when pipeline.filter_by_consent = true");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.embedding.model.is_empty() {
        bail!("embedding.model must not be empty");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0 when set");
    }

    Ok(())
}
