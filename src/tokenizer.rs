//! Tokenizer selection.
//!
//! Maps `pipeline.tokenizer` to a concrete
//! [`Tokenizer`](embedding_pipeline_core::tokenize::Tokenizer):
//!
//! | Value | Implementation |
//! |-------|----------------|
//! | `approx` | [`ApproxTokenizer`] (4 characters per token) |
//! | `words` | [`WordTokenizer`] |
//! | `huggingface` | `HfTokenizer` loading `pipeline.tokenizer_path` (needs the `hf-tokenizer` feature) |

use std::sync::Arc;

use anyhow::{bail, Result};
use embedding_pipeline_core::tokenize::{ApproxTokenizer, Tokenizer, WordTokenizer};

use crate::config::PipelineConfig;

pub fn create_tokenizer(config: &PipelineConfig) -> Result<Arc<dyn Tokenizer>> {
    match config.tokenizer.as_str() {
        "approx" => Ok(Arc::new(ApproxTokenizer)),
        "words" => Ok(Arc::new(WordTokenizer)),
        "huggingface" => huggingface(config),
        other => bail!(
            "Unknown tokenizer: '{}'. Must be approx, words, or huggingface.",
            other
        ),
    }
}

#[cfg(feature = "hf-tokenizer")]
fn huggingface(config: &PipelineConfig) -> Result<Arc<dyn Tokenizer>> {
    use anyhow::Context;

    let path = config
        .tokenizer_path
        .as_ref()
        .context("pipeline.tokenizer_path is required when tokenizer = 'huggingface'")?;
    Ok(Arc::new(hf::HfTokenizer::from_file(path)?))
}

#[cfg(not(feature = "hf-tokenizer"))]
fn huggingface(_config: &PipelineConfig) -> Result<Arc<dyn Tokenizer>> {
    bail!("tokenizer = 'huggingface' requires building with the 'hf-tokenizer' feature")
}

#[cfg(feature = "hf-tokenizer")]
pub mod hf {
    //! Tokenizer backed by a Hugging Face `tokenizer.json`.

    use std::ops::Range;
    use std::path::Path;

    use anyhow::{anyhow, Result};
    use embedding_pipeline_core::tokenize::Tokenizer;

    pub struct HfTokenizer {
        inner: tokenizers::Tokenizer,
    }

    impl HfTokenizer {
        pub fn from_file(path: &Path) -> Result<Self> {
            let inner = tokenizers::Tokenizer::from_file(path)
                .map_err(|e| anyhow!("Failed to load tokenizer {}: {}", path.display(), e))?;
            Ok(Self { inner })
        }
    }

    impl Tokenizer for HfTokenizer {
        fn name(&self) -> &str {
            "huggingface"
        }

        /// Byte offsets of each token. Special tokens carry empty offsets
        /// and are dropped, as are repeated offsets from byte-level pieces
        /// of one character.
        fn tokenize(&self, text: &str) -> Result<Vec<Range<usize>>> {
            let encoding = self
                .inner
                .encode(text, false)
                .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

            let mut spans: Vec<Range<usize>> = Vec::with_capacity(encoding.len());
            for &(start, end) in encoding.get_offsets() {
                if start >= end {
                    continue;
                }
                if let Some(last) = spans.last() {
                    if start < last.end {
                        continue;
                    }
                }
                spans.push(start..end);
            }
            Ok(spans)
        }
    }
}
