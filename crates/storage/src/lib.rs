//! Object-store plumbing for asset synchronization.
//!
//! The `StorageClient` trait is the capability seam over the backing store's
//! PUT/GET/HEAD/LIST semantics; everything above it is orchestration:
//!
//! - **Hash cache** - avoids re-hashing unchanged files
//! - **Existence cache** - avoids redundant HEAD checks against the store
//! - **Upload orchestrator** - bounded-parallel content upload with
//!   content-addressed deduplication
//! - **Download orchestrator** - bounded-parallel download with a second,
//!   download-side dedup pass
//! - **Manifest storage** - manifest key layout, upload/download, and
//!   output-manifest discovery
//!
//! Bulk operations share one progress/cancellation contract: a callback
//! fires after each unit of work and its `false` return stops new
//! scheduling, drains in-flight work, and surfaces a cancellation error
//! carrying partial statistics.

pub mod download;
pub mod error;
pub mod hash_cache;
pub mod location;
pub mod manifest_storage;
pub mod memory;
pub mod progress;
pub mod retry;
pub mod s3_check_cache;
pub mod settings;
pub mod traits;
pub mod upload;

pub use download::{download_files_from_manifests, ConflictResolution};
pub use error::StorageError;
pub use hash_cache::{
    HashCache, HashCacheBackend, HashCacheEntry, NoopHashCache, SqliteHashCache,
};
pub use location::{generate_random_guid, join_s3_paths, S3Location};
pub use manifest_storage::{
    download_manifest, input_manifest_name, output_manifests_by_asset_root, upload_input_manifest,
    ManifestUploadResult, ASSET_ROOT_METADATA_KEY,
};
pub use memory::MemoryStorageClient;
pub use progress::{
    human_readable_file_size, DownloadSummaryStatistics, ProgressCallback, ProgressReportMetadata,
    ProgressStatus, ProgressTracker, SummaryStatistics,
};
pub use retry::{with_retries, RetrySettings};
pub use s3_check_cache::{
    NoopS3CheckCache, S3CheckCache, S3CheckCacheBackend, SqliteS3CheckCache, ENTRY_EXPIRY_DAYS,
};
pub use settings::StorageSettings;
pub use traits::{ObjectInfo, ObjectMetadata, StorageClient};
pub use upload::UploadOrchestrator;
