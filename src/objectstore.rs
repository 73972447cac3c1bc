//! Minimal object-storage staging surface (§5 "Shared resources", §6 "Staged
//! output layout").
//!
//! The core never reads arbitrary objects back out; it only needs to write
//! staged parquet files under a computed prefix and, for diagnostics/tests,
//! list what has been written under a prefix. A full blob-service surface
//! (multipart upload, signed URLs, byte-range reads) belongs to an external
//! collaborator, not the core (see DESIGN.md).

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::McsResult;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> McsResult<()>;
    async fn list_prefix(&self, prefix: &str) -> McsResult<Vec<String>>;
}

/// In-memory object store for tests and local runs.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> McsResult<()> {
        self.objects.lock().insert(path.to_string(), bytes);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> McsResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_only_matching_prefix() {
        let store = InMemoryObjectStore::new();
        store.put("jobs/a/0.parquet", vec![1]).await.unwrap();
        store.put("jobs/a/1.parquet", vec![2]).await.unwrap();
        store.put("jobs/b/0.parquet", vec![3]).await.unwrap();

        let listed = store.list_prefix("jobs/a/").await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
