//! In-memory storage client.
//!
//! Backs orchestrator tests and local experimentation. Counts the requests
//! it serves so tests can assert on deduplication behavior, and can be told
//! to fail a number of upcoming puts to exercise retry paths.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::traits::{ObjectInfo, ObjectMetadata, StorageClient};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    metadata: HashMap<String, String>,
}

/// A `StorageClient` holding objects in a process-local map.
#[derive(Default)]
pub struct MemoryStorageClient {
    objects: Mutex<HashMap<String, StoredObject>>,
    head_count: AtomicU64,
    put_count: AtomicU64,
    get_count: AtomicU64,
    fail_next_puts: AtomicU64,
}

impl MemoryStorageClient {
    /// Create an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    fn object_id(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    /// Insert an object directly, bypassing counters.
    pub fn seed(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects.lock().insert(
            Self::object_id(bucket, key),
            StoredObject {
                data,
                metadata: HashMap::new(),
            },
        );
    }

    /// Whether an object is present.
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects.lock().contains_key(&Self::object_id(bucket, key))
    }

    /// Number of objects stored.
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    /// HEAD requests served.
    pub fn head_count(&self) -> u64 {
        self.head_count.load(Ordering::SeqCst)
    }

    /// PUT requests served (including failed ones).
    pub fn put_count(&self) -> u64 {
        self.put_count.load(Ordering::SeqCst)
    }

    /// GET requests served.
    pub fn get_count(&self) -> u64 {
        self.get_count.load(Ordering::SeqCst)
    }

    /// Make the next `count` puts fail with a transient 503.
    pub fn fail_next_puts(&self, count: u64) {
        self.fail_next_puts.store(count, Ordering::SeqCst);
    }

    fn maybe_fail_put(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let remaining: u64 = self.fail_next_puts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next_puts.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::ClientError {
                action: "uploading file".to_string(),
                status_code: 503,
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "injected transient failure".to_string(),
            });
        }
        Ok(())
    }

    fn store(&self, bucket: &str, key: &str, data: Vec<u8>, metadata: Option<&HashMap<String, String>>) {
        self.objects.lock().insert(
            Self::object_id(bucket, key),
            StoredObject {
                data,
                metadata: metadata.cloned().unwrap_or_default(),
            },
        );
    }
}

#[async_trait]
impl StorageClient for MemoryStorageClient {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError> {
        self.head_count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .objects
            .lock()
            .get(&Self::object_id(bucket, key))
            .map(|object| ObjectMetadata {
                size: object.data.len() as u64,
                user_metadata: object.metadata.clone(),
            }))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StorageError> {
        self.put_count.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail_put(bucket, key)?;
        self.store(bucket, key, data, metadata);
        Ok(())
    }

    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        file_path: &Path,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StorageError> {
        self.put_count.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail_put(bucket, key)?;
        let data: Vec<u8> = std::fs::read(file_path)
            .map_err(|e| StorageError::io_error(file_path.display().to_string(), e))?;
        self.store(bucket, key, data, metadata);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get_count.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .get(&Self::object_id(bucket, key))
            .map(|object| object.data.clone())
            .ok_or_else(|| StorageError::ClientError {
                action: "downloading file".to_string(),
                status_code: 404,
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "object not found".to_string(),
            })
    }

    async fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        file_path: &Path,
    ) -> Result<(), StorageError> {
        let data: Vec<u8> = self.get_object(bucket, key).await?;
        std::fs::write(file_path, data)
            .map_err(|e| StorageError::io_error(file_path.display().to_string(), e))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, StorageError> {
        let full_prefix: String = Self::object_id(bucket, prefix);
        let bucket_prefix: String = format!("{bucket}/");
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|(id, _)| id.starts_with(&full_prefix))
            .map(|(id, object)| ObjectInfo {
                key: id[bucket_prefix.len()..].to_string(),
                size: object.data.len() as u64,
            })
            .collect())
    }
}
