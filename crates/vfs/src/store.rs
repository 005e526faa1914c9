//! Content retrieval for the virtual filesystem.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use farmsync_model::HashAlgorithm;
use farmsync_storage::{S3Location, StorageClient};

use crate::error::VfsError;

/// Retrieves file content by hash.
///
/// The FUSE layer reads through this trait so it can be backed by the real
/// object store, a local mirror, or memory in tests.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Retrieve the entire content for a hash.
    async fn retrieve(&self, hash: &str, algorithm: HashAlgorithm) -> Result<Vec<u8>, VfsError>;

    /// Retrieve a byte range of the content for a hash.
    async fn retrieve_range(
        &self,
        hash: &str,
        algorithm: HashAlgorithm,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, VfsError> {
        let data: Vec<u8> = self.retrieve(hash, algorithm).await?;
        let start: usize = (offset as usize).min(data.len());
        let end: usize = ((offset + size) as usize).min(data.len());
        Ok(data[start..end].to_vec())
    }
}

/// `FileStore` over a `StorageClient` and the standard CAS key layout.
pub struct StorageClientAdapter<C: StorageClient> {
    client: Arc<C>,
    location: S3Location,
}

impl<C: StorageClient> StorageClientAdapter<C> {
    /// Create an adapter reading from the given location.
    pub fn new(client: Arc<C>, location: S3Location) -> Self {
        Self { client, location }
    }
}

#[async_trait]
impl<C: StorageClient> FileStore for StorageClientAdapter<C> {
    async fn retrieve(&self, hash: &str, algorithm: HashAlgorithm) -> Result<Vec<u8>, VfsError> {
        let key: String = self.location.cas_object_key(hash, algorithm);
        self.client
            .get_object(&self.location.bucket, &key)
            .await
            .map_err(|e| VfsError::ContentRetrievalFailed {
                hash: hash.to_string(),
                message: e.to_string(),
            })
    }
}

/// In-memory file store for tests.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    content: HashMap<String, Vec<u8>>,
}

impl MemoryFileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add content under a hash.
    pub fn insert(&mut self, hash: impl Into<String>, data: Vec<u8>) {
        self.content.insert(hash.into(), data);
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn retrieve(&self, hash: &str, _algorithm: HashAlgorithm) -> Result<Vec<u8>, VfsError> {
        self.content
            .get(hash)
            .cloned()
            .ok_or_else(|| VfsError::ContentRetrievalFailed {
                hash: hash.to_string(),
                message: "hash not present in memory store".to_string(),
            })
    }
}
