//! Submission and worker workflows for render-job asset attachments.
//!
//! Submission side: `AssetManager` groups declared paths by asset root,
//! hashes them against the local hash cache, and uploads content plus
//! manifests, producing the `Attachments` payload for job creation.
//!
//! Worker side: `sync_inputs` recreates the job's inputs under session
//! destination roots (eagerly, or as a lazy virtual mount),
//! `OutputDownloader` brings a job's outputs back, and the snapshot module
//! diffs live directories against manifests for incremental captures.

pub mod asset_manager;
pub mod error;
pub mod grouping;
mod hashing;
pub mod output_downloader;
pub mod snapshot;
pub mod sync_inputs;
pub mod types;

pub use asset_manager::AssetManager;
pub use error::SyncError;
pub use grouping::{group_asset_paths, prepare_paths_for_upload};
pub use output_downloader::OutputDownloader;
pub use snapshot::{fast_diff, rehash_diff, snapshot};
pub use sync_inputs::{sync_inputs, AssetSync, SyncInputsOptions};
pub use types::{
    AssetRootGroup, AssetRootManifest, AssetUploadGroup, Attachments, ControlPlaneClient,
    FileSystemLocation, FileSystemLocationType, JobAttachmentsFileSystem, ManifestProperties,
    StorageProfile,
};
