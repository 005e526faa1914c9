//! Storage client capability trait.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageError;

/// Information about an object from a list operation.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Full object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Metadata about an object from a HEAD operation.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    /// Object size in bytes.
    pub size: u64,
    /// User-defined object metadata.
    pub user_metadata: HashMap<String, String>,
}

/// Low-level object-store operations, implemented per backend.
///
/// This is the capability seam: production code wraps the real service
/// client, tests use `MemoryStorageClient`. Methods map one-to-one onto the
/// store's PUT/GET/HEAD/LIST semantics; orchestration (pooling, retries,
/// caching, cancellation) lives above this trait.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Expected bucket owner account, attached to every request when set.
    fn expected_bucket_owner(&self) -> Option<&str> {
        None
    }

    /// Check whether an object exists; `None` when it does not.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<ObjectMetadata>, StorageError>;

    /// Upload bytes.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StorageError>;

    /// Upload a local file, streamed by the implementation.
    async fn put_object_from_file(
        &self,
        bucket: &str,
        key: &str,
        file_path: &Path,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<(), StorageError>;

    /// Download an object into memory.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Download an object to a local file, streamed by the implementation.
    async fn get_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        file_path: &Path,
    ) -> Result<(), StorageError>;

    /// List objects under a key prefix.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, StorageError>;
}
