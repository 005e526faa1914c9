//! Error types for manifest operations.

use thiserror::Error;

use crate::hash::HashAlgorithm;

/// Errors that can occur during manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Unknown manifest version: '{found}' (supported: {supported})")]
    UnknownVersion { found: String, supported: String },

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cannot merge manifests with different hash algorithms: expected {expected}, got {actual}")]
    MergeHashAlgorithmMismatch {
        expected: HashAlgorithm,
        actual: HashAlgorithm,
    },

    #[error("Failed to read {path} for hashing: {source}")]
    HashIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ManifestError {
    /// Build an `UnknownVersion` error listing the supported versions.
    pub fn unknown_version(found: impl Into<String>) -> Self {
        ManifestError::UnknownVersion {
            found: found.into(),
            supported: crate::version::ManifestVersion::supported_versions().join(", "),
        }
    }
}

/// Validation errors raised while decoding a manifest.
///
/// A manifest that fails validation is never partially trusted; decode
/// returns the first violation found.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Manifest is missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("Path entry '{path}' is missing required field '{field}'")]
    MissingPathField { path: String, field: &'static str },

    #[error("Path entry '{path}' has non-alphanumeric hash '{hash}'")]
    NonAlphanumericHash { path: String, hash: String },

    #[error("Path entry has empty path")]
    EmptyPath,
}
