//! Virtual filesystem error types.

use thiserror::Error;

/// Errors raised by the virtual mount layer.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The mount executable could not be located.
    #[error("Virtual filesystem executable not found (checked PATH and FARMSYNC_VFS_PATH)")]
    ExecutableMissing,

    /// The mount subprocess launched but the mount point never appeared.
    #[error("Virtual filesystem failed to mount at {mount_point}")]
    FailedToMount { mount_point: String },

    /// Content for a hash could not be fetched from the store.
    #[error("Failed to retrieve content for hash {hash}: {message}")]
    ContentRetrievalFailed { hash: String, message: String },

    /// Building the in-process filesystem failed.
    #[error("Mount setup failed: {0}")]
    MountSetup(String),

    /// Local IO failure at a specific path.
    #[error("IO error at {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl VfsError {
    /// Create an `IoError` from a path and `std::io::Error`.
    pub fn io_error(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }
}
