//! Per-service text extraction.
//!
//! Each supported service registers a pure function that maps one parsed
//! log record to zero or more [`TextChunk`]s. New services are supported by
//! registering another rule; unknown services yield nothing.
//!
//! | Service | Rule | Source tag |
//! |---------|------|------------|
//! | `lyfbot-service` | non-empty `prompt` and `response` | `lyfbot-prompt`, `lyfbot-response` |
//! | `journal-service` | non-empty `entry_content`, split into windows | `journal-entry` |
//! | `chat-service` | `message_type == "text"`, non-empty `message_content` | `chat-message` |
//! | `community-service` | `content_type == "post"`, non-empty `content` | `community-post` |

use std::collections::BTreeMap;

use anyhow::Result;
use uuid::Uuid;

use crate::chunk::ChunkSplitter;
use crate::models::{ChunkMetadata, ChunkSource, LogRecord, TextChunk};

pub const CHATBOT_SERVICE: &str = "lyfbot-service";
pub const JOURNAL_SERVICE: &str = "journal-service";
pub const CHAT_SERVICE: &str = "chat-service";
pub const COMMUNITY_SERVICE: &str = "community-service";

/// An extraction rule for one service.
pub type ExtractFn = fn(&LogRecord, &ChunkSplitter) -> Result<Vec<TextChunk>>;

/// Map from service name to its extraction rule.
#[derive(Clone)]
pub struct ExtractorRegistry {
    rules: BTreeMap<String, ExtractFn>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Registry with the four built-in service rules.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CHATBOT_SERVICE, extract_chatbot);
        registry.register(JOURNAL_SERVICE, extract_journal);
        registry.register(CHAT_SERVICE, extract_chat);
        registry.register(COMMUNITY_SERVICE, extract_community);
        registry
    }

    /// Register (or replace) the rule for a service.
    pub fn register(&mut self, service: &str, rule: ExtractFn) {
        self.rules.insert(service.to_string(), rule);
    }

    pub fn supports(&self, service: &str) -> bool {
        self.rules.contains_key(service)
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Apply the rule for `service` to `record`.
    ///
    /// Returns no chunks if the service has no registered rule.
    pub fn extract(
        &self,
        service: &str,
        record: &LogRecord,
        splitter: &ChunkSplitter,
    ) -> Result<Vec<TextChunk>> {
        match self.rules.get(service) {
            Some(rule) => rule(record, splitter),
            None => Ok(Vec::new()),
        }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rules.keys()).finish()
    }
}

fn extract_chatbot(record: &LogRecord, splitter: &ChunkSplitter) -> Result<Vec<TextChunk>> {
    let (Some(prompt), Some(response)) = (record.text_field("prompt"), record.text_field("response"))
    else {
        return Ok(Vec::new());
    };
    let mut chunks = whole_text(prompt, ChunkSource::Prompt, record, splitter)?;
    chunks.extend(whole_text(response, ChunkSource::Response, record, splitter)?);
    Ok(chunks)
}

fn extract_journal(record: &LogRecord, splitter: &ChunkSplitter) -> Result<Vec<TextChunk>> {
    let Some(entry) = record.text_field("entry_content") else {
        return Ok(Vec::new());
    };
    Ok(splitter
        .split(entry)?
        .into_iter()
        .map(|seg| make_chunk(seg.text, ChunkSource::JournalEntry, record, seg.token_count))
        .collect())
}

fn extract_chat(record: &LogRecord, splitter: &ChunkSplitter) -> Result<Vec<TextChunk>> {
    if record.str_field("message_type") != Some("text") {
        return Ok(Vec::new());
    }
    match record.text_field("message_content") {
        Some(text) => whole_text(text, ChunkSource::ChatMessage, record, splitter),
        None => Ok(Vec::new()),
    }
}

fn extract_community(record: &LogRecord, splitter: &ChunkSplitter) -> Result<Vec<TextChunk>> {
    if record.str_field("content_type") != Some("post") {
        return Ok(Vec::new());
    }
    match record.text_field("content") {
        Some(text) => whole_text(text, ChunkSource::CommunityPost, record, splitter),
        None => Ok(Vec::new()),
    }
}

/// Emit `text` untouched as a single chunk, unless it is longer than the
/// chunk size, in which case it is windowed like a journal entry.
fn whole_text(
    text: &str,
    source: ChunkSource,
    record: &LogRecord,
    splitter: &ChunkSplitter,
) -> Result<Vec<TextChunk>> {
    let token_count = splitter.count_tokens(text)?;
    if token_count <= splitter.chunk_size() {
        return Ok(vec![make_chunk(text.to_string(), source, record, token_count)]);
    }
    Ok(splitter
        .split(text)?
        .into_iter()
        .map(|seg| make_chunk(seg.text, source, record, seg.token_count))
        .collect())
}

fn make_chunk(text: String, source: ChunkSource, record: &LogRecord, token_count: usize) -> TextChunk {
    TextChunk {
        id: Uuid::new_v4().to_string(),
        text,
        source,
        user_id: record.user_id(),
        timestamp: record.timestamp(),
        metadata: ChunkMetadata::from_record(record),
        token_count,
    }
}
