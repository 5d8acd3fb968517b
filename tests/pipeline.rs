//! End-to-end runs of the orchestrator against in-memory adapters.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;

use embedding_pipeline::cancel::RunControl;
use embedding_pipeline::config::{
    parse_config, FailureIsolation, FailurePolicy, ProcessingConfig, VectorStoreMode,
};
use embedding_pipeline::consent::{ConsentSource, StaticConsentSource};
use embedding_pipeline::embedding::Embedder;
use embedding_pipeline::error::PipelineError;
use embedding_pipeline::object_store::memory::InMemoryObjectStore;
use embedding_pipeline::object_store::{ListPage, ObjectStore, PutObject};
use embedding_pipeline::pipeline::{run_last_days, Pipeline, PipelineDeps};
use embedding_pipeline::vector_store::VectorSink;
use embedding_pipeline_core::extract::ExtractorRegistry;
use embedding_pipeline_core::models::{ChunkSource, EmbeddingRecord};
use embedding_pipeline_core::partition::DateRange;
use embedding_pipeline_core::tokenize::ApproxTokenizer;

// ============ Fakes ============

#[derive(Default)]
struct FakeEmbedder {
    calls: Mutex<Vec<usize>>,
    fail_on_call: Option<usize>,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "test-model"
    }

    fn dims(&self) -> Option<usize> {
        Some(2)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(texts.len());
            calls.len()
        };
        if self.fail_on_call == Some(call) {
            bail!("embedding service returned 503");
        }
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

#[derive(Default)]
struct RecordingSink {
    stored: Mutex<Vec<EmbeddingRecord>>,
}

#[async_trait]
impl VectorSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn store(&self, records: &[EmbeddingRecord]) -> Result<usize> {
        self.stored.lock().unwrap().extend_from_slice(records);
        Ok(records.len())
    }
}

/// Delegates to an in-memory store but fails listings under one prefix.
struct FailingListStore {
    inner: InMemoryObjectStore,
    failing_prefix: String,
}

#[async_trait]
impl ObjectStore for FailingListStore {
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        if prefix == self.failing_prefix {
            bail!("access denied");
        }
        self.inner.list_page(prefix, token).await
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get_object(key).await
    }

    async fn put_object(&self, object: PutObject) -> Result<()> {
        self.inner.put_object(object).await
    }
}

// ============ Helpers ============

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn processing(services: &[&str], start: u32, end: u32) -> ProcessingConfig {
    ProcessingConfig {
        bucket: "test-lake".to_string(),
        region: "us-east-1".to_string(),
        output_path: "embeddings".to_string(),
        services: services.iter().map(|s| s.to_string()).collect(),
        date_range: DateRange::new(day(start), day(end)),
        embedding_model: "test-model".to_string(),
        chunk_size: 1000,
        chunk_overlap: 200,
        batch_size: 100,
        batch_delay_ms: 0,
        vector_store: VectorStoreMode::Qdrant,
        backup_to_store: true,
        filter_by_consent: false,
        failure_policy: FailurePolicy::default(),
    }
}

struct Harness {
    store: Arc<InMemoryObjectStore>,
    embedder: Arc<FakeEmbedder>,
    sink: Arc<RecordingSink>,
    consent: Arc<dyn ConsentSource>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: Arc::new(InMemoryObjectStore::new()),
            embedder: Arc::new(FakeEmbedder::default()),
            sink: Arc::new(RecordingSink::default()),
            consent: Arc::new(StaticConsentSource::default()),
        }
    }

    fn deps(&self) -> PipelineDeps {
        PipelineDeps {
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            sink: Some(self.sink.clone()),
            consent: self.consent.clone(),
            tokenizer: Arc::new(ApproxTokenizer),
            extractors: ExtractorRegistry::with_defaults(),
        }
    }

    fn pipeline(&self, config: ProcessingConfig) -> Pipeline {
        Pipeline::new(config, self.deps(), RunControl::new()).unwrap()
    }

    fn backups(&self) -> Vec<String> {
        self.store.keys_with_prefix("embeddings/")
    }
}

fn chat_line(user: &str, text: &str) -> String {
    json!({
        "user_id": user,
        "timestamp": "2024-01-01T09:00:00Z",
        "service": "chat-service",
        "session_id": "s-1",
        "interaction_type": "message",
        "message_type": "text",
        "message_content": text,
    })
    .to_string()
}

fn jsonl(lines: &[String]) -> Vec<u8> {
    let mut body = lines.join("\n");
    body.push('\n');
    body.into_bytes()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

// ============ Tests ============

#[tokio::test]
async fn test_scans_each_day_in_range() {
    let h = Harness::new();
    for d in 1..=4 {
        h.store.insert(
            &format!("raw/chat-service/2024/01/{:02}/part-0.jsonl", d),
            jsonl(&[chat_line("u1", &format!("message on day {}", d))]),
        );
    }

    let stats = h.pipeline(processing(&["chat-service"], 1, 3)).run().await.unwrap();

    assert_eq!(stats.objects_processed, 3);
    assert_eq!(stats.total_embeddings, 3);
    let texts: Vec<String> = h
        .sink
        .stored
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.text.clone())
        .collect();
    assert_eq!(
        texts,
        vec!["message on day 1", "message on day 2", "message on day 3"]
    );
    assert_eq!(stats.date_range.start, "2024-01-01T00:00:00.000Z");
    assert_eq!(stats.date_range.end, "2024-01-03T23:59:59.999Z");
}

#[tokio::test]
async fn test_malformed_line_is_dropped() {
    let h = Harness::new();
    let mut lines: Vec<String> = (0..9).map(|i| chat_line("u1", &format!("m{}", i))).collect();
    lines.insert(4, "{\"user_id\": \"u1\", \"message_type\": ".to_string());
    h.store
        .insert("raw/chat-service/2024/01/01/a.jsonl", jsonl(&lines));

    let stats = h.pipeline(processing(&["chat-service"], 1, 1)).run().await.unwrap();

    assert_eq!(stats.total_embeddings, 9);
    assert_eq!(stats.objects_processed, 1);
    assert_eq!(stats.objects_skipped, 0);
}

#[tokio::test]
async fn test_embedding_failure_aborts_without_backup() {
    let mut h = Harness::new();
    h.embedder = Arc::new(FakeEmbedder {
        fail_on_call: Some(2),
        ..Default::default()
    });
    let lines: Vec<String> = (0..5).map(|i| chat_line("u1", &format!("m{}", i))).collect();
    h.store
        .insert("raw/chat-service/2024/01/01/a.jsonl", jsonl(&lines));

    let mut config = processing(&["chat-service"], 1, 1);
    config.batch_size = 2;
    let err = h.pipeline(config).run().await.unwrap_err();

    assert!(matches!(err, PipelineError::Embedding { batch: 2, .. }));
    assert!(h.backups().is_empty());
    assert!(h.sink.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_isolated_embedding_failure_drops_batch() {
    let mut h = Harness::new();
    h.embedder = Arc::new(FakeEmbedder {
        fail_on_call: Some(2),
        ..Default::default()
    });
    let lines: Vec<String> = (0..5).map(|i| chat_line("u1", &format!("m{}", i))).collect();
    h.store
        .insert("raw/chat-service/2024/01/01/a.jsonl", jsonl(&lines));

    let mut config = processing(&["chat-service"], 1, 1);
    config.batch_size = 2;
    config.failure_policy.embedding_batches = FailureIsolation::Isolate;
    let stats = h.pipeline(config).run().await.unwrap();

    assert_eq!(stats.total_embeddings, 3);
    assert_eq!(stats.chunks_dropped, 2);
    assert_eq!(*h.embedder.calls.lock().unwrap(), vec![2, 2, 1]);
}

#[tokio::test]
async fn test_backup_round_trips() {
    let h = Harness::new();
    let lines: Vec<String> = (0..3).map(|i| chat_line("u1", &format!("m{}", i))).collect();
    h.store
        .insert("raw/chat-service/2024/01/01/a.jsonl", jsonl(&lines));

    let stats = h.pipeline(processing(&["chat-service"], 1, 1)).run().await.unwrap();

    let key = stats.backup_key.clone().unwrap();
    assert!(key.starts_with("embeddings/embeddings_backup_"));
    assert!(key.ends_with(".json.gz"));

    let stored = h.store.get(&key).unwrap();
    assert_eq!(stats.backup_file_size, stored.body.len() as u64);
    assert_eq!(stored.content_type.as_deref(), Some("application/gzip"));
    assert_eq!(stored.metadata["embedding-count"], "3");

    let restored: Vec<EmbeddingRecord> = serde_json::from_slice(&gunzip(&stored.body)).unwrap();
    assert_eq!(restored, *h.sink.stored.lock().unwrap());
    assert_eq!(restored.len(), 3);
    assert_eq!(stats.vectors_stored, 3);
}

#[tokio::test]
async fn test_consent_filtering() {
    let mut h = Harness::new();
    h.consent = Arc::new(StaticConsentSource::new(["u1"]));
    let anonymous = json!({
        "message_type": "text",
        "message_content": "no user attached"
    })
    .to_string();
    h.store.insert(
        "raw/chat-service/2024/01/01/a.jsonl",
        jsonl(&[chat_line("u1", "from u1"), chat_line("u2", "from u2"), anonymous]),
    );

    let mut config = processing(&["chat-service"], 1, 1);
    config.filter_by_consent = true;
    let stats = h.pipeline(config).run().await.unwrap();

    assert_eq!(stats.total_embeddings, 2);
    let stored = h.sink.stored.lock().unwrap();
    let users: HashSet<&str> = stored.iter().map(|r| r.user_id.as_str()).collect();
    assert_eq!(users, HashSet::from(["u1", "anonymous"]));
}

#[tokio::test]
async fn test_bad_gzip_object_is_skipped() {
    let h = Harness::new();
    h.store.insert(
        "raw/chat-service/2024/01/01/a.jsonl.gz",
        gzip(&jsonl(&[chat_line("u1", "compressed")])),
    );
    h.store
        .insert("raw/chat-service/2024/01/01/b.jsonl.gz", b"garbage".to_vec());

    let stats = h.pipeline(processing(&["chat-service"], 1, 1)).run().await.unwrap();

    assert_eq!(stats.objects_processed, 1);
    assert_eq!(stats.objects_skipped, 1);
    assert_eq!(stats.total_embeddings, 1);
    assert_eq!(h.sink.stored.lock().unwrap()[0].text, "compressed");
}

#[tokio::test]
async fn test_bad_object_aborts_under_abort_policy() {
    let h = Harness::new();
    h.store
        .insert("raw/chat-service/2024/01/01/b.jsonl.gz", b"garbage".to_vec());

    let mut config = processing(&["chat-service"], 1, 1);
    config.failure_policy.objects = FailureIsolation::Abort;
    let err = h.pipeline(config).run().await.unwrap_err();

    match err {
        PipelineError::Object { key, .. } => {
            assert_eq!(key, "raw/chat-service/2024/01/01/b.jsonl.gz")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_listing_failure_policy() {
    let inner = InMemoryObjectStore::new();
    inner.insert(
        "raw/chat-service/2024/01/02/a.jsonl",
        jsonl(&[chat_line("u1", "day two")]),
    );
    let store = Arc::new(FailingListStore {
        inner,
        failing_prefix: "raw/chat-service/2024/01/01/".to_string(),
    });
    let sink = Arc::new(RecordingSink::default());
    let deps = || PipelineDeps {
        store: store.clone(),
        embedder: Arc::new(FakeEmbedder::default()),
        sink: Some(sink.clone()),
        consent: Arc::new(StaticConsentSource::default()),
        tokenizer: Arc::new(ApproxTokenizer),
        extractors: ExtractorRegistry::with_defaults(),
    };

    let err = Pipeline::new(processing(&["chat-service"], 1, 2), deps(), RunControl::new())
        .unwrap()
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Listing { ref prefix, .. } if prefix == "raw/chat-service/2024/01/01/"));
    assert!(store.inner.keys_with_prefix("embeddings/").is_empty());
    assert!(sink.stored.lock().unwrap().is_empty());

    let mut config = processing(&["chat-service"], 1, 2);
    config.failure_policy.listing = FailureIsolation::Isolate;
    let stats = Pipeline::new(config, deps(), RunControl::new())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(stats.total_embeddings, 1);
    assert_eq!(stats.objects_processed, 1);
}

#[tokio::test]
async fn test_denied_listing_does_not_produce_empty_backup() {
    let store = Arc::new(FailingListStore {
        inner: InMemoryObjectStore::new(),
        failing_prefix: "raw/lyfbot-service/2024/01/01/".to_string(),
    });
    let deps = PipelineDeps {
        store: store.clone(),
        embedder: Arc::new(FakeEmbedder::default()),
        sink: None,
        consent: Arc::new(StaticConsentSource::default()),
        tokenizer: Arc::new(ApproxTokenizer),
        extractors: ExtractorRegistry::with_defaults(),
    };

    let mut config = processing(&["lyfbot-service", "chat-service"], 1, 1);
    config.vector_store = VectorStoreMode::S3Only;
    let err = Pipeline::new(config, deps, RunControl::new())
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Listing { .. }));
    assert!(store.inner.keys_with_prefix("embeddings/").is_empty());
}

#[tokio::test]
async fn test_each_object_is_embedded_separately() {
    let h = Harness::new();
    for name in ["a", "b", "c"] {
        h.store.insert(
            &format!("raw/chat-service/2024/01/01/{}.jsonl", name),
            jsonl(&[chat_line("u1", &format!("message {}", name))]),
        );
    }

    let stats = h.pipeline(processing(&["chat-service"], 1, 1)).run().await.unwrap();

    assert_eq!(*h.embedder.calls.lock().unwrap(), vec![1, 1, 1]);
    assert_eq!(stats.total_embeddings, 3);
    let texts: Vec<String> = h
        .sink
        .stored
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.text.clone())
        .collect();
    assert_eq!(texts, vec!["message a", "message b", "message c"]);
}

#[tokio::test]
async fn test_embedding_failure_in_later_object_aborts() {
    let mut h = Harness::new();
    h.embedder = Arc::new(FakeEmbedder {
        fail_on_call: Some(2),
        ..Default::default()
    });
    for name in ["a", "b"] {
        h.store.insert(
            &format!("raw/chat-service/2024/01/01/{}.jsonl", name),
            jsonl(&[chat_line("u1", &format!("message {}", name))]),
        );
    }

    let err = h
        .pipeline(processing(&["chat-service"], 1, 1))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Embedding { batch: 1, .. }));
    assert!(h.backups().is_empty());
    assert!(h.sink.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_long_journal_entry_is_windowed() {
    let h = Harness::new();
    let entry = "abcd".repeat(2500);
    let line = json!({
        "user_id": "u1",
        "service": "journal-service",
        "entry_content": entry,
    })
    .to_string();
    h.store
        .insert("raw/journal-service/2024/01/01/a.jsonl", jsonl(&[line]));

    let stats = h
        .pipeline(processing(&["journal-service"], 1, 1))
        .run()
        .await
        .unwrap();

    let stored = h.sink.stored.lock().unwrap();
    let counts: Vec<usize> = stored.iter().map(|r| r.metadata.token_count).collect();
    assert_eq!(counts, vec![1000, 1000, 900, 100]);
    assert!(stored.iter().all(|r| r.source == ChunkSource::JournalEntry));
    assert_eq!(stored[1].text, entry[3200..7200]);
    assert_eq!(stats.average_chunk_size, 750.0);
}

#[tokio::test]
async fn test_s3_only_skips_vector_store() {
    let h = Harness::new();
    h.store.insert(
        "raw/chat-service/2024/01/01/a.jsonl",
        jsonl(&[chat_line("u1", "hi")]),
    );

    let mut config = processing(&["chat-service"], 1, 1);
    config.vector_store = VectorStoreMode::S3Only;
    let stats = h.pipeline(config).run().await.unwrap();

    assert_eq!(stats.vectors_stored, 0);
    assert_eq!(stats.total_embeddings, 1);
    assert!(h.sink.stored.lock().unwrap().is_empty());
    assert_eq!(h.backups().len(), 1);
}

#[tokio::test]
async fn test_no_backup_when_disabled() {
    let h = Harness::new();
    let mut config = processing(&["chat-service"], 1, 1);
    config.backup_to_store = false;
    let stats = h.pipeline(config).run().await.unwrap();

    assert!(stats.backup_key.is_none());
    assert_eq!(stats.backup_file_size, 0);
    assert!(h.backups().is_empty());
}

#[tokio::test]
async fn test_unknown_service_yields_nothing() {
    let h = Harness::new();
    h.store.insert(
        "raw/billing-service/2024/01/01/a.jsonl",
        jsonl(&[chat_line("u1", "not embedded")]),
    );

    let mut config = processing(&["billing-service"], 1, 1);
    config.backup_to_store = false;
    let stats = h.pipeline(config).run().await.unwrap();

    assert_eq!(stats.total_embeddings, 0);
    assert_eq!(stats.services_processed, vec!["billing-service"]);
    assert_eq!(h.store.list_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let h = Harness::new();
    h.store.insert(
        "raw/chat-service/2024/01/01/a.jsonl",
        jsonl(&[chat_line("u1", "hi")]),
    );

    let control = RunControl::new();
    control.cancel();
    let err = Pipeline::new(processing(&["chat-service"], 1, 1), h.deps(), control)
        .unwrap()
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert!(h.backups().is_empty());
    assert!(h.embedder.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_sink_is_rejected() {
    let h = Harness::new();
    let mut deps = h.deps();
    deps.sink = None;
    assert!(Pipeline::new(processing(&["chat-service"], 1, 1), deps, RunControl::new()).is_err());
}

#[tokio::test]
async fn test_last_days_zero_is_an_error() {
    let config = parse_config(
        r#"
[storage]
bucket = "test-lake"

[pipeline]
vector_store = "s3-only"
filter_by_consent = false
"#,
    )
    .unwrap();
    let h = Harness::new();
    let err = run_last_days(&config, h.deps(), 0, day(10), RunControl::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidDateRange(_)));
}

#[tokio::test]
async fn test_last_days_covers_days_before_today() {
    let config = parse_config(
        r#"
[storage]
bucket = "test-lake"

[pipeline]
services = ["chat-service"]
vector_store = "s3-only"
filter_by_consent = false
batch_delay_ms = 0
"#,
    )
    .unwrap();
    let h = Harness::new();
    for d in 6..=10 {
        h.store.insert(
            &format!("raw/chat-service/2024/01/{:02}/a.jsonl", d),
            jsonl(&[chat_line("u1", &format!("day {}", d))]),
        );
    }

    let stats = run_last_days(&config, h.deps(), 3, day(10), RunControl::new())
        .await
        .unwrap();

    assert_eq!(stats.objects_processed, 3);
    assert_eq!(stats.date_range.start, "2024-01-07T00:00:00.000Z");
    assert_eq!(stats.date_range.end, "2024-01-09T23:59:59.999Z");
}
