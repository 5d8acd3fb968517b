//! Vector store sinks.
//!
//! A [`VectorSink`] receives the full set of embeddings produced by a run
//! and reports how many it wrote. The orchestrator only sees that count;
//! the wire format belongs to each adapter.
//!
//! | Mode | Sink | Request |
//! |------|------|---------|
//! | `s3-only` | none | step skipped |
//! | `qdrant` | [`QdrantSink`] | `PUT {url}/collections/{collection}/points?wait=true` |
//! | `weaviate` | [`WeaviateSink`] | `POST {url}/v1/batch/objects` |
//!
//! Records are upserted in sub-batches of `vector_store.upsert_batch_size`.
//! Point ids are the chunk ids, so re-running a day overwrites rather than
//! duplicates.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use embedding_pipeline_core::models::EmbeddingRecord;
use serde_json::{json, Map, Value};

use crate::config::{VectorStoreConfig, VectorStoreMode};

#[async_trait]
pub trait VectorSink: Send + Sync {
    /// Short identifier used in logs (e.g. `"qdrant"`).
    fn name(&self) -> &str;

    /// Persist `records`, returning the number actually written.
    async fn store(&self, records: &[EmbeddingRecord]) -> Result<usize>;
}

/// Build the sink for `mode`. Returns `None` for `s3-only`.
pub fn create_sink(
    mode: VectorStoreMode,
    config: Option<&VectorStoreConfig>,
) -> Result<Option<Arc<dyn VectorSink>>> {
    let require = || {
        config.ok_or_else(|| {
            anyhow!(
                "[vector_store] section required when pipeline.vector_store = '{}'",
                mode.as_str()
            )
        })
    };

    let sink: Arc<dyn VectorSink> = match mode {
        VectorStoreMode::S3Only => return Ok(None),
        VectorStoreMode::Qdrant => Arc::new(QdrantSink::new(require()?)?),
        VectorStoreMode::Weaviate => Arc::new(WeaviateSink::new(require()?)?),
    };
    Ok(Some(sink))
}

/// Searchable fields stored next to each vector.
fn record_properties(record: &EmbeddingRecord) -> Map<String, Value> {
    let mut props = Map::new();
    props.insert("user_id".into(), json!(record.user_id));
    props.insert("text".into(), json!(record.text));
    props.insert("source".into(), json!(record.source.as_str()));
    props.insert("chunk_id".into(), json!(record.metadata.chunk_id));
    props.insert("token_count".into(), json!(record.metadata.token_count));
    props.insert("embedding_model".into(), json!(record.metadata.embedding_model));

    let optional = [
        ("timestamp", &record.timestamp),
        ("service", &record.metadata.service),
        ("interaction_type", &record.metadata.interaction_type),
        ("session_id", &record.metadata.session_id),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            props.insert(name.into(), json!(value));
        }
    }
    props
}

fn read_api_key(config: &VectorStoreConfig) -> Result<Option<String>> {
    match config.api_key_env {
        Some(ref var) => std::env::var(var)
            .map(Some)
            .with_context(|| format!("{} environment variable not set", var)),
        None => Ok(None),
    }
}

fn http_client(config: &VectorStoreConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build vector store HTTP client")
}

// ============ Qdrant ============

pub struct QdrantSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    batch_size: usize,
}

impl QdrantSink {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            endpoint: format!(
                "{}/collections/{}/points?wait=true",
                config.url.trim_end_matches('/'),
                config.collection
            ),
            api_key: read_api_key(config)?,
            batch_size: config.upsert_batch_size.max(1),
        })
    }
}

fn qdrant_points(records: &[EmbeddingRecord]) -> Value {
    let points: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.metadata.chunk_id,
                "vector": r.embedding,
                "payload": record_properties(r),
            })
        })
        .collect();
    json!({ "points": points })
}

#[async_trait]
impl VectorSink for QdrantSink {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn store(&self, records: &[EmbeddingRecord]) -> Result<usize> {
        let mut written = 0;
        for batch in records.chunks(self.batch_size) {
            let mut req = self.client.put(&self.endpoint).json(&qdrant_points(batch));
            if let Some(ref key) = self.api_key {
                req = req.header("api-key", key);
            }

            let resp = req
                .send()
                .await
                .with_context(|| format!("Qdrant upsert to {} failed", self.endpoint))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "Qdrant upsert failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            written += batch.len();
            tracing::debug!(written, total = records.len(), "Qdrant upsert batch stored");
        }
        Ok(written)
    }
}

// ============ Weaviate ============

pub struct WeaviateSink {
    client: reqwest::Client,
    endpoint: String,
    class: String,
    api_key: Option<String>,
    batch_size: usize,
}

impl WeaviateSink {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            endpoint: format!("{}/v1/batch/objects", config.url.trim_end_matches('/')),
            class: config.collection.clone(),
            api_key: read_api_key(config)?,
            batch_size: config.upsert_batch_size.max(1),
        })
    }
}

fn weaviate_objects(class: &str, records: &[EmbeddingRecord]) -> Value {
    let objects: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "class": class,
                "id": r.metadata.chunk_id,
                "vector": r.embedding,
                "properties": record_properties(r),
            })
        })
        .collect();
    json!({ "objects": objects })
}

/// Count objects in a batch response that carry no `result.errors`.
fn count_weaviate_successes(response: &Value) -> Result<usize> {
    let items = response
        .as_array()
        .ok_or_else(|| anyhow!("Invalid Weaviate batch response: expected an array"))?;

    let mut ok = 0;
    for item in items {
        let errors = item.pointer("/result/errors/error").and_then(|e| e.as_array());
        match errors {
            Some(errors) if !errors.is_empty() => {
                tracing::warn!(
                    id = item.get("id").and_then(|i| i.as_str()).unwrap_or("?"),
                    error = %errors[0],
                    "Weaviate rejected object"
                );
            }
            _ => ok += 1,
        }
    }
    Ok(ok)
}

#[async_trait]
impl VectorSink for WeaviateSink {
    fn name(&self) -> &str {
        "weaviate"
    }

    async fn store(&self, records: &[EmbeddingRecord]) -> Result<usize> {
        let mut written = 0;
        for batch in records.chunks(self.batch_size) {
            let mut req = self
                .client
                .post(&self.endpoint)
                .json(&weaviate_objects(&self.class, batch));
            if let Some(ref key) = self.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            let resp = req
                .send()
                .await
                .with_context(|| format!("Weaviate batch to {} failed", self.endpoint))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "Weaviate batch failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let body: Value = resp.json().await?;
            written += count_weaviate_successes(&body)?;
        }
        Ok(written)
    }
}
