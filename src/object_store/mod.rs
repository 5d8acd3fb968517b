//! Object-store abstraction.
//!
//! The pipeline reads raw logs from, and writes backups to, a bucket-like
//! store. [`ObjectStore`] is the seam: [`s3::S3Store`] talks to S3 (or an
//! S3-compatible service) over signed REST calls, and
//! [`memory::InMemoryObjectStore`] backs tests.
//!
//! [`list_all`] is the paginated lister used by the orchestrator.

pub mod memory;
pub mod s3;

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Key and size of one listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Opaque token for the next page; `None` when the listing is complete.
    pub next_token: Option<String>,
}

/// An object to upload.
#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// User metadata (stored as `x-amz-meta-*` on S3).
    pub metadata: BTreeMap<String, String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one page of objects under `prefix`, continuing from `token`.
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage>;

    /// Download an object's full body.
    ///
    /// Fails if the object does not exist or has no body.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    async fn put_object(&self, object: PutObject) -> Result<()>;

    /// Size of the object stored at exactly `key`, if it exists.
    ///
    /// The default looks the key up with a prefix listing.
    async fn object_size(&self, key: &str) -> Result<Option<u64>> {
        let page = self.list_page(key, None).await?;
        Ok(page
            .objects
            .into_iter()
            .find(|o| o.key == key)
            .map(|o| o.size))
    }
}

/// List every object under `prefix`, following continuation tokens until
/// the store reports no further pages.
///
/// Any page failure aborts the listing.
pub async fn list_all(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<ObjectInfo>> {
    let mut objects = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = store.list_page(prefix, token.as_deref()).await?;
        objects.extend(page.objects);

        match page.next_token {
            Some(next) if token.as_deref() == Some(next.as_str()) => {
                bail!("object store returned the same continuation token twice for {}", prefix)
            }
            Some(next) => token = Some(next),
            None => break,
        }
    }

    Ok(objects)
}
