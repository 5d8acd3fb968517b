//! Fetching raw log objects.
//!
//! Objects whose key ends in `.gz` are gunzipped after download. Multi-member
//! gzip files (several gzip streams concatenated, as produced by appending
//! log writers) are decoded in full. Decompression runs on the blocking
//! pool so large objects do not stall the runtime.

use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;

use crate::object_store::ObjectStore;

/// Download `key` and return its decompressed bytes.
pub async fn fetch_log(store: &dyn ObjectStore, key: &str) -> Result<Vec<u8>> {
    let body = store
        .get_object(key)
        .await
        .with_context(|| format!("failed to download {}", key))?;

    if is_gzip_key(key) {
        tokio::task::spawn_blocking(move || gunzip(&body))
            .await
            .context("decompression task failed")?
            .with_context(|| format!("failed to decompress {}", key))
    } else {
        Ok(body)
    }
}

fn is_gzip_key(key: &str) -> bool {
    key.ends_with(".gz")
}

pub(crate) fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
