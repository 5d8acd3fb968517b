//! In-memory [`ObjectStore`] for tests and dry runs.
//!
//! Objects live in a sorted map behind `std::sync::RwLock`, so listings come
//! back in key order like S3. Page size is configurable to exercise
//! continuation tokens, and individual keys can be marked as failing.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{ListPage, ObjectInfo, ObjectStore, PutObject};

/// A stored object with the metadata it was uploaded with.
#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failing_keys: RwLock<HashSet<String>>,
    page_size: usize,
    list_calls: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            failing_keys: RwLock::new(HashSet::new()),
            page_size: 1000,
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Limit the number of objects returned per listing page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn insert(&self, key: &str, body: Vec<u8>) {
        self.objects.write().unwrap().insert(
            key.to_string(),
            StoredObject {
                body,
                ..Default::default()
            },
        );
    }

    /// Make `get_object` fail for `key`.
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.write().unwrap().insert(key.to_string());
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().unwrap().get(key).cloned()
    }

    /// All keys under `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .read()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of `list_page` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().unwrap();

        let mut matching = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| token.map_or(true, |t| k.as_str() > t));

        let page: Vec<ObjectInfo> = matching
            .by_ref()
            .take(self.page_size)
            .map(|(k, o)| ObjectInfo {
                key: k.clone(),
                size: o.body.len() as u64,
            })
            .collect();

        let next_token = match matching.next() {
            Some(_) => page.last().map(|o| o.key.clone()),
            None => None,
        };

        Ok(ListPage {
            objects: page,
            next_token,
        })
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        if self.failing_keys.read().unwrap().contains(key) {
            bail!("simulated failure reading {}", key);
        }
        self.objects
            .read()
            .unwrap()
            .get(key)
            .map(|o| o.body.clone())
            .ok_or_else(|| anyhow!("No body in object store response for key: {}", key))
    }

    async fn put_object(&self, object: PutObject) -> Result<()> {
        self.objects.write().unwrap().insert(
            object.key,
            StoredObject {
                body: object.body,
                content_type: Some(object.content_type),
                metadata: object.metadata,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryObjectStore::new();
        let mut metadata = BTreeMap::new();
        metadata.insert("embedding-count".to_string(), "2".to_string());
        store
            .put_object(PutObject {
                key: "out/a.json.gz".to_string(),
                body: vec![1, 2, 3],
                content_type: "application/gzip".to_string(),
                metadata,
            })
            .await
            .unwrap();

        assert_eq!(store.get_object("out/a.json.gz").await.unwrap(), vec![1, 2, 3]);
        let stored = store.get("out/a.json.gz").unwrap();
        assert_eq!(stored.metadata["embedding-count"], "2");
        assert_eq!(store.keys_with_prefix("out/"), vec!["out/a.json.gz"]);
    }

    #[tokio::test]
    async fn test_failing_key() {
        let store = InMemoryObjectStore::new();
        store.insert("raw/a.jsonl", b"{}".to_vec());
        store.fail_key("raw/a.jsonl");
        assert!(store.get_object("raw/a.jsonl").await.is_err());
    }

    #[tokio::test]
    async fn test_last_page_has_no_token() {
        let store = InMemoryObjectStore::new().with_page_size(2);
        store.insert("p/1", vec![]);
        store.insert("p/2", vec![]);

        let page = store.list_page("p/", None).await.unwrap();
        assert_eq!(page.objects.len(), 2);
        assert!(page.next_token.is_none());
    }
}
