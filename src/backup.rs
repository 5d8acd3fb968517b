//! Compressed backup of a run's embeddings.
//!
//! Every run (unless `backup_to_store = false`) writes all of its
//! embeddings to the object store as one gzipped, pretty-printed JSON array
//! under `{output_path}/embeddings_backup_{yyyy-MM-dd-HHmmss}_{id8}.json.gz`.
//! The object carries user metadata identifying it as a backup, its
//! creation time, record count, and embedding model.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use embedding_pipeline_core::models::EmbeddingRecord;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::object_store::{ObjectStore, PutObject};

pub const BACKUP_CONTENT_TYPE: &str = "application/gzip";

pub struct BackupArchiver<'a> {
    store: &'a dyn ObjectStore,
    output_path: &'a str,
    model: &'a str,
}

impl<'a> BackupArchiver<'a> {
    pub fn new(store: &'a dyn ObjectStore, output_path: &'a str, model: &'a str) -> Self {
        Self {
            store,
            output_path,
            model,
        }
    }

    /// Upload `records` and return the key they were written under.
    pub async fn archive(&self, records: &[EmbeddingRecord]) -> Result<String> {
        let now = Utc::now();
        let key = backup_key(self.output_path, now);

        let json = serde_json::to_vec_pretty(records).context("failed to serialize embeddings")?;
        let body = gzip(&json).context("failed to compress embeddings backup")?;

        let mut metadata = BTreeMap::new();
        metadata.insert("mindlyf-embeddings".to_string(), "backup".to_string());
        metadata.insert("backup-timestamp".to_string(), now.to_rfc3339());
        metadata.insert("embedding-count".to_string(), records.len().to_string());
        metadata.insert("embedding-model".to_string(), self.model.to_string());

        let compressed = body.len();
        self.store
            .put_object(PutObject {
                key: key.clone(),
                body,
                content_type: BACKUP_CONTENT_TYPE.to_string(),
                metadata,
            })
            .await
            .with_context(|| format!("failed to upload backup {}", key))?;

        tracing::info!(
            key = %key,
            records = records.len(),
            bytes = compressed,
            "Backed up embeddings"
        );
        Ok(key)
    }
}

/// `{output_path}/embeddings_backup_{yyyy-MM-dd-HHmmss}_{8 hex chars}.json.gz`
pub fn backup_key(output_path: &str, now: DateTime<Utc>) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let filename = format!(
        "embeddings_backup_{}_{}.json.gz",
        now.format("%Y-%m-%d-%H%M%S"),
        &id[..8]
    );
    let prefix = output_path.trim_end_matches('/');
    if prefix.is_empty() {
        filename
    } else {
        format!("{}/{}", prefix, filename)
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::gunzip;
    use crate::object_store::memory::InMemoryObjectStore;
    use chrono::TimeZone;
    use embedding_pipeline_core::models::{ChunkSource, EmbeddingMetadata};

    fn record(i: usize) -> EmbeddingRecord {
        EmbeddingRecord {
            user_id: format!("user-{}", i),
            text: format!("text {}", i),
            embedding: vec![i as f32, 0.5],
            source: ChunkSource::ChatMessage,
            timestamp: Some("2024-03-01T12:00:00Z".to_string()),
            metadata: EmbeddingMetadata {
                service: Some("chat-service".to_string()),
                interaction_type: Some("message".to_string()),
                session_id: None,
                chunk_id: format!("chunk-{}", i),
                token_count: 2,
                embedding_model: "text-embedding-ada-002".to_string(),
            },
        }
    }

    #[test]
    fn test_backup_key_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let key = backup_key("embeddings", now);
        let rest = key
            .strip_prefix("embeddings/embeddings_backup_2024-03-05-070809_")
            .unwrap();
        let id = rest.strip_suffix(".json.gz").unwrap();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(backup_key("embeddings", now), key);
    }

    #[test]
    fn test_backup_key_trims_slash() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(backup_key("out/", now).starts_with("out/embeddings_backup_"));
        assert!(backup_key("", now).starts_with("embeddings_backup_"));
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let store = InMemoryObjectStore::new();
        let records: Vec<_> = (0..3).map(record).collect();

        let key = BackupArchiver::new(&store, "embeddings", "text-embedding-ada-002")
            .archive(&records)
            .await
            .unwrap();

        let stored = store.get(&key).unwrap();
        assert_eq!(stored.content_type.as_deref(), Some(BACKUP_CONTENT_TYPE));
        assert_eq!(stored.metadata["mindlyf-embeddings"], "backup");
        assert_eq!(stored.metadata["embedding-count"], "3");
        assert_eq!(stored.metadata["embedding-model"], "text-embedding-ada-002");
        assert!(DateTime::parse_from_rfc3339(&stored.metadata["backup-timestamp"]).is_ok());

        let json = gunzip(&stored.body).unwrap();
        let restored: Vec<EmbeddingRecord> = serde_json::from_slice(&json).unwrap();
        assert_eq!(restored, records);
        assert!(String::from_utf8(json).unwrap().contains("\n  {\n"));
    }
}
