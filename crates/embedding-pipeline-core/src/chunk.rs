//! Token-window text splitter.
//!
//! Splits text into overlapping windows bounded by a maximum token count.
//!
//! # Algorithm
//!
//! 1. Tokenize the text into `L` token spans.
//! 2. With chunk size `S`, overlap `O` (`O < S`) and `step = S - O`:
//!    - `L == 0` produces no segments;
//!    - `L <= S` produces one segment holding every token;
//!    - otherwise emit `tokens[i..min(i + S, L)]` for `i = 0, step, 2·step, …`
//!      while `i < L`.
//! 3. Each segment's text is the exact source slice from its first token's
//!    start to its last token's end.
//!
//! Every token lands in at least one segment, and consecutive segments
//! share exactly `O` tokens except where the tail window is shorter.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use embedding_pipeline_core::chunk::ChunkSplitter;
//! use embedding_pipeline_core::tokenize::WordTokenizer;
//!
//! let splitter = ChunkSplitter::new(Arc::new(WordTokenizer), 3, 1).unwrap();
//! let segments = splitter.split("a b c d e").unwrap();
//! let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
//! assert_eq!(texts, vec!["a b c", "c d e", "e"]);
//! ```

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::tokenize::{decode_spans, Tokenizer};

/// One window produced by [`ChunkSplitter::split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Index of the window's first token in the full token sequence.
    pub start_token: usize,
    pub token_count: usize,
}

/// Sliding-window splitter with token-count semantics.
#[derive(Clone)]
pub struct ChunkSplitter {
    tokenizer: Arc<dyn Tokenizer>,
    chunk_size: usize,
    overlap: usize,
}

impl std::fmt::Debug for ChunkSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSplitter")
            .field("tokenizer", &self.tokenizer.name())
            .field("chunk_size", &self.chunk_size)
            .field("overlap", &self.overlap)
            .finish()
    }
}

impl ChunkSplitter {
    /// Create a splitter.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_size` is zero or `overlap >= chunk_size`.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk size must be > 0");
        }
        if overlap >= chunk_size {
            bail!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap,
                chunk_size
            );
        }
        Ok(Self {
            tokenizer,
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn tokenizer(&self) -> &dyn Tokenizer {
        self.tokenizer.as_ref()
    }

    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        self.tokenizer.count_tokens(text)
    }

    /// Split `text` into overlapping token windows.
    pub fn split(&self, text: &str) -> Result<Vec<Segment>> {
        let spans = self.tokenizer.tokenize(text)?;
        let total = spans.len();

        if total == 0 {
            return Ok(Vec::new());
        }

        if total <= self.chunk_size {
            return Ok(vec![Segment {
                text: decode_spans(text, &spans).to_string(),
                start_token: 0,
                token_count: total,
            }]);
        }

        let step = self.chunk_size - self.overlap;
        let mut segments = Vec::with_capacity(total.div_ceil(step));
        let mut start = 0;

        while start < total {
            let end = (start + self.chunk_size).min(total);
            let window = &spans[start..end];
            segments.push(Segment {
                text: decode_spans(text, window).to_string(),
                start_token: start,
                token_count: window.len(),
            });
            start += step;
        }

        Ok(segments)
    }
}
