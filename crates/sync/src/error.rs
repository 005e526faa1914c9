//! Error types for submission and worker workflows.

use thiserror::Error;

use farmsync_storage::{StorageError, SummaryStatistics};

/// Errors raised by the sync workflows.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Declared inputs are missing or misclassified. Raised before any side
    /// effect; the message lists every offending path.
    #[error("Job submission contains missing input files or directories classified as files. All inputs must exist and be classified properly.{details}")]
    MisconfiguredInputs { details: String },

    /// The operation was cancelled through the progress callback.
    #[error("Operation cancelled ({} files processed, {} skipped)", .statistics.processed_files, .statistics.skipped_files)]
    Cancelled { statistics: SummaryStatistics },

    /// No path mapping rule covers a manifest's source root.
    #[error("No path mapping rule found for source path {source_path}")]
    NoPathMappingRule { source_path: String },

    /// A root path was not found among the job's output manifests.
    #[error("Root path {root_path} was not found in output manifests")]
    UnknownOutputRoot { root_path: String },

    /// A background hashing task panicked or was torn down.
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error(transparent)]
    FileSystem(#[from] farmsync_filesystem::FileSystemError),

    #[error(transparent)]
    Manifest(#[from] farmsync_model::ManifestError),

    #[error(transparent)]
    Vfs(#[from] farmsync_vfs::VfsError),
}

impl From<StorageError> for SyncError {
    fn from(error: StorageError) -> Self {
        // Cancellation keeps its own variant so callers see one shape
        // regardless of which phase was cancelled.
        match error {
            StorageError::Cancelled { statistics } => SyncError::Cancelled { statistics },
            other => SyncError::Storage(other),
        }
    }
}
