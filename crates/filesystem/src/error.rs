//! File system error types.

use thiserror::Error;

/// Errors that can occur during file system operations.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Path does not exist.
    #[error("Path not found: {path}")]
    PathNotFound { path: String },

    /// Path escapes the directory it must stay within.
    #[error("Path is outside root: {path} not in {root}")]
    PathOutsideRoot { path: String, root: String },

    /// Glob pattern failed to compile.
    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidGlobPattern { pattern: String, reason: String },

    /// IO failure at a specific path.
    #[error("IO error at {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The OS principal named in permission settings does not exist.
    #[error("Unknown OS principal: {name}")]
    UnknownPrincipal { name: String },

    /// Changing ownership or permission bits failed. Never downgraded to a
    /// warning; a tree with wrong permissions is a security problem.
    #[error("Failed to set permissions on {path}: {message}")]
    PermissionChange { path: String, message: String },

    /// Path mapping file could not be parsed.
    #[error("Invalid path mapping file {path}: {message}")]
    InvalidMappingFile { path: String, message: String },
}

impl FileSystemError {
    /// Create an `IoError` from a path and `std::io::Error`.
    pub fn io_error(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }
}
