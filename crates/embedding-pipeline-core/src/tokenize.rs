//! Tokenizers used for chunk sizing.
//!
//! A [`Tokenizer`] returns byte spans into the input rather than token ids.
//! Decoding a run of tokens is then a slice of the original text from the
//! first span's start to the last span's end, which keeps chunk text
//! byte-identical to the source and makes splitting deterministic.
//!
//! Built-in tokenizers:
//!
//! | Name | Rule |
//! |------|------|
//! | `approx` | fixed 4 characters per token |
//! | `words` | each alphanumeric run and each other non-space character |
//!
//! The app crate adds a Hugging Face `tokenizer.json` backed tokenizer.

use std::ops::Range;

use anyhow::Result;

/// Approximate characters-per-token ratio for English text.
pub const CHARS_PER_TOKEN: usize = 4;

/// Splits text into token spans.
pub trait Tokenizer: Send + Sync {
    /// Short identifier used in logs and config (e.g. `"approx"`).
    fn name(&self) -> &str;

    /// Byte ranges of each token in `text`, in order and non-overlapping.
    fn tokenize(&self, text: &str) -> Result<Vec<Range<usize>>>;

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.tokenize(text)?.len())
    }
}

/// Slice of `text` covered by a contiguous run of token spans.
pub fn decode_spans<'a>(text: &'a str, spans: &[Range<usize>]) -> &'a str {
    match (spans.first(), spans.last()) {
        (Some(first), Some(last)) => &text[first.start..last.end],
        _ => "",
    }
}

/// Fixed-width character tokenizer: every `CHARS_PER_TOKEN` characters is one token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn name(&self) -> &str {
        "approx"
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let mut spans = Vec::with_capacity(text.len() / CHARS_PER_TOKEN + 1);
        let mut start = 0;
        let mut chars_in_token = 0;

        for (idx, ch) in text.char_indices() {
            chars_in_token += 1;
            if chars_in_token == CHARS_PER_TOKEN {
                let end = idx + ch.len_utf8();
                spans.push(start..end);
                start = end;
                chars_in_token = 0;
            }
        }
        if chars_in_token > 0 {
            spans.push(start..text.len());
        }

        Ok(spans)
    }
}

/// Word-level tokenizer.
///
/// Alphanumeric runs are single tokens; every other non-whitespace
/// character is its own token; whitespace separates tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn name(&self) -> &str {
        "words"
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Range<usize>>> {
        let mut spans = Vec::new();
        let mut word_start: Option<usize> = None;

        for (idx, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                if word_start.is_none() {
                    word_start = Some(idx);
                }
                continue;
            }
            if let Some(start) = word_start.take() {
                spans.push(start..idx);
            }
            if !ch.is_whitespace() {
                spans.push(idx..idx + ch.len_utf8());
            }
        }
        if let Some(start) = word_start {
            spans.push(start..text.len());
        }

        Ok(spans)
    }
}
