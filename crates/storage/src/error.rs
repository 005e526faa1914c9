//! Storage error types.

use thiserror::Error;

use crate::progress::SummaryStatistics;

/// Errors raised by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Local IO failure at a specific path.
    #[error("IO error at {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The backing store rejected a request. Carries enough context to name
    /// the failing object.
    #[error("Error {action} in bucket '{bucket}', key or prefix '{key}', HTTP status {status_code}: {message}")]
    ClientError {
        action: String,
        status_code: u16,
        bucket: String,
        key: String,
        message: String,
    },

    /// A transport-level failure with no HTTP response.
    #[error("Backend error while {action}: {details}")]
    BackendError { action: String, details: String },

    /// The operation was cancelled through the progress callback. Carries
    /// the statistics accumulated up to the point of cancellation.
    #[error("Operation cancelled ({} files processed, {} skipped)", .statistics.processed_files, .statistics.skipped_files)]
    Cancelled { statistics: SummaryStatistics },

    /// Manifest encode/decode failure.
    #[error(transparent)]
    Manifest(#[from] farmsync_model::ManifestError),

    /// Bucket or root prefix missing from configuration.
    #[error("Invalid storage location: {message}")]
    InvalidLocation { message: String },

    /// Output-manifest scope is inconsistent (e.g. a task without a step).
    #[error("Invalid output scope: {message}")]
    InvalidOutputScope { message: String },

    /// An output manifest has no recorded asset root in its metadata.
    #[error("Output manifest '{key}' has no asset-root metadata")]
    MissingAssetRoot { key: String },
}

impl StorageError {
    /// Create an `IoError` from a path and `std::io::Error`.
    pub fn io_error(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying this error may succeed.
    ///
    /// Server-side and throttling responses are transient; everything else
    /// (bad input, missing objects, local IO) is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::ClientError { status_code, .. } => {
                matches!(status_code, 408 | 429 | 500 | 502 | 503 | 504)
            }
            StorageError::BackendError { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_error(status_code: u16) -> StorageError {
        StorageError::ClientError {
            action: "uploading file".to_string(),
            status_code,
            bucket: "assets".to_string(),
            key: "Data/abc.xxh128".to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn test_transient_statuses_are_retryable() {
        assert!(client_error(500).is_retryable());
        assert!(client_error(503).is_retryable());
        assert!(client_error(429).is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!client_error(403).is_retryable());
        assert!(!client_error(404).is_retryable());
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        let err: StorageError = StorageError::Cancelled {
            statistics: SummaryStatistics::default(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_client_error_message_names_bucket_and_key() {
        let message: String = client_error(500).to_string();
        assert!(message.contains("assets"));
        assert!(message.contains("Data/abc.xxh128"));
        assert!(message.contains("500"));
    }
}
