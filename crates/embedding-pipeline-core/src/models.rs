//! Core data models that flow through the embedding pipeline.
//!
//! A [`LogRecord`] is parsed from one line of a raw log object, turned into
//! zero or more [`TextChunk`]s by the extractor, and each surviving chunk
//! becomes exactly one [`EmbeddingRecord`] once the embedding API returns.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User id recorded on embeddings whose source record had none.
pub const ANONYMOUS_USER: &str = "anonymous";

/// One untyped JSON object from a newline-delimited log file.
///
/// Field sets vary by service, so the record stays a JSON map and exposes
/// typed accessors for the fields the pipeline reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogRecord(Map<String, Value>);

impl LogRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Returns the raw JSON value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns a field as a string slice if it is a JSON string.
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Returns a field only if it is a non-empty JSON string.
    pub fn text_field(&self, field: &str) -> Option<&str> {
        self.str_field(field).filter(|s| !s.is_empty())
    }

    /// The record's user id, if present and non-empty.
    ///
    /// Numeric ids are accepted and rendered in their JSON form.
    pub fn user_id(&self) -> Option<String> {
        match self.0.get("user_id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<String> {
        self.str_field("timestamp").map(str::to_string)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for LogRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Which extraction rule produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkSource {
    #[serde(rename = "lyfbot-prompt")]
    Prompt,
    #[serde(rename = "lyfbot-response")]
    Response,
    #[serde(rename = "journal-entry")]
    JournalEntry,
    #[serde(rename = "chat-message")]
    ChatMessage,
    #[serde(rename = "community-post")]
    CommunityPost,
}

impl ChunkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkSource::Prompt => "lyfbot-prompt",
            ChunkSource::Response => "lyfbot-response",
            ChunkSource::JournalEntry => "journal-entry",
            ChunkSource::ChatMessage => "chat-message",
            ChunkSource::CommunityPost => "community-post",
        }
    }
}

impl std::fmt::Display for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance copied from the source log record onto every chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub interaction_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChunkMetadata {
    pub fn from_record(record: &LogRecord) -> Self {
        Self {
            service: record.str_field("service").map(str::to_string),
            interaction_type: record.str_field("interaction_type").map(str::to_string),
            session_id: record.str_field("session_id").map(str::to_string),
        }
    }
}

/// A bounded span of text ready to be embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Fresh UUID v4.
    pub id: String,
    pub text: String,
    pub source: ChunkSource,
    pub user_id: Option<String>,
    pub timestamp: Option<String>,
    pub metadata: ChunkMetadata,
    pub token_count: usize,
}

/// Metadata stored alongside each embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub interaction_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub chunk_id: String,
    pub token_count: usize,
    pub embedding_model: String,
}

/// An embedded chunk. Created once by the batcher and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub user_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub source: ChunkSource,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub metadata: EmbeddingMetadata,
}

impl EmbeddingRecord {
    /// Attach a vector returned by the embedding API to its chunk.
    pub fn from_chunk(chunk: TextChunk, embedding: Vec<f32>, model: &str) -> Self {
        Self {
            user_id: chunk
                .user_id
                .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
            text: chunk.text,
            embedding,
            source: chunk.source,
            timestamp: chunk.timestamp,
            metadata: EmbeddingMetadata {
                service: chunk.metadata.service,
                interaction_type: chunk.metadata.interaction_type,
                session_id: chunk.metadata.session_id,
                chunk_id: chunk.id,
                token_count: chunk.token_count,
                embedding_model: model.to_string(),
            },
        }
    }
}
