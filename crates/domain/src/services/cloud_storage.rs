//! Cloud object storage abstraction.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Errors returned by cloud storage backends.
#[derive(Debug, Error)]
pub enum CloudStorageError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Access denied to bucket {0}")]
    AccessDenied(String),

    #[error("Storage request failed: {0}")]
    Request(String),
}

/// Object storage used for cloud deliveries.
#[async_trait]
pub trait CloudStorage: Send + Sync {
    /// Store `body` under `key`, replacing any previous object.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CloudStorageError>;

    /// Remove an object. Missing objects are not an error.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError>;
}

/// In-process object store keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    failing: AtomicBool,
    puts: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Number of successful writes so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudStorage for InMemoryObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CloudStorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CloudStorageError::Request(format!(
                "simulated failure writing {}/{}",
                bucket, key
            )));
        }
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((bucket.to_string(), key.to_string()), body);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudStorageError> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryObjectStore::new();
        store
            .put_object("import-export", "test.csv", b"a,b\r\n".to_vec())
            .await
            .unwrap();

        assert_eq!(
            store.get_object("import-export", "test.csv"),
            Some(b"a,b\r\n".to_vec())
        );
        assert!(store.get_object("import-export", "other.csv").is_none());
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = InMemoryObjectStore::new();
        store.set_failing(true);
        let result = store.put_object("import-export", "test.csv", vec![]).await;
        assert!(matches!(result, Err(CloudStorageError::Request(_))));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = InMemoryObjectStore::new();
        assert!(store.delete_object("import-export", "nope.csv").await.is_ok());
    }
}
