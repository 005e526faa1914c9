//! The 2023-03-03 manifest format.
//!
//! A manifest is an ordered list of file entries (relative path, content
//! hash, size, mtime) plus the hash algorithm and aggregate size. Encoding is
//! canonical: entries sorted by the UTF-16BE encoding of their path, object
//! keys in lexicographic order, no whitespace. Two identical file sets
//! therefore encode to byte-identical JSON regardless of how the filesystem
//! was iterated.

use serde_json::{json, Value};

use crate::error::{ManifestError, ValidationError};
use crate::hash::HashAlgorithm;
use crate::version::ManifestVersion;

/// A single file entry in a manifest. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestPath {
    /// Path relative to the asset root, forward-slashed on every host OS.
    pub path: String,
    /// Content hash, alphanumeric hex.
    pub hash: String,
    /// File size in bytes.
    pub size: u64,
    /// Modification time in microseconds since the Unix epoch.
    pub mtime: i64,
}

impl ManifestPath {
    /// Create a new manifest path entry.
    pub fn new(path: impl Into<String>, hash: impl Into<String>, size: u64, mtime: i64) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            size,
            mtime,
        }
    }
}

/// Asset manifest, format version 2023-03-03.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    /// Hashing algorithm used for all entries.
    pub hash_alg: HashAlgorithm,
    /// Manifest format version.
    pub manifest_version: ManifestVersion,
    /// File entries.
    pub paths: Vec<ManifestPath>,
    /// Total size of all entries in bytes.
    pub total_size: u64,
}

impl AssetManifest {
    /// Create a manifest from file entries, computing the total size.
    pub fn new(paths: Vec<ManifestPath>) -> Self {
        let total_size: u64 = paths.iter().map(|p| p.size).sum();
        Self {
            hash_alg: HashAlgorithm::Xxh128,
            manifest_version: ManifestVersion::V2023_03_03,
            paths,
            total_size,
        }
    }

    /// Encode to the canonical JSON string.
    pub fn encode(&self) -> Result<String, ManifestError> {
        let mut sorted: Vec<&ManifestPath> = self.paths.iter().collect();
        // Sort by UTF-16BE code units, per the canonical-JSON property order
        // rules (RFC 8785).
        sorted.sort_by(|a, b| {
            let a_units: Vec<u16> = a.path.encode_utf16().collect();
            let b_units: Vec<u16> = b.path.encode_utf16().collect();
            a_units.cmp(&b_units)
        });

        // serde_json's default map is key-ordered, which matches the
        // lexicographic key order the canonical form requires.
        let output: Value = json!({
            "hashAlg": self.hash_alg,
            "manifestVersion": self.manifest_version,
            "paths": sorted.iter().map(|p| {
                json!({
                    "hash": p.hash,
                    "mtime": p.mtime,
                    "path": p.path,
                    "size": p.size,
                })
            }).collect::<Vec<_>>(),
            "totalSize": self.total_size,
        });

        Ok(serde_json::to_string(&output)?)
    }

    /// Decode from a parsed JSON value, validating every field.
    ///
    /// # Errors
    /// Returns `ManifestError::Validation` naming the first missing or
    /// malformed field, or `ManifestError::UnsupportedHashAlgorithm` for an
    /// unrecognized `hashAlg`.
    pub fn decode(data: &Value) -> Result<Self, ManifestError> {
        let hash_alg_value: &Value = data
            .get("hashAlg")
            .ok_or(ValidationError::MissingField { field: "hashAlg" })?;
        let hash_alg: HashAlgorithm = serde_json::from_value(hash_alg_value.clone())
            .map_err(|_| ManifestError::UnsupportedHashAlgorithm(hash_alg_value.to_string()))?;

        let total_size: u64 = data
            .get("totalSize")
            .and_then(|v| v.as_u64())
            .ok_or(ValidationError::MissingField { field: "totalSize" })?;

        let raw_paths: &Vec<Value> = data
            .get("paths")
            .and_then(|v| v.as_array())
            .ok_or(ValidationError::MissingField { field: "paths" })?;

        let mut paths: Vec<ManifestPath> = Vec::with_capacity(raw_paths.len());
        for entry in raw_paths {
            paths.push(decode_path_entry(entry)?);
        }

        Ok(Self {
            hash_alg,
            manifest_version: ManifestVersion::V2023_03_03,
            paths,
            total_size,
        })
    }
}

/// Decode and validate a single path entry.
fn decode_path_entry(entry: &Value) -> Result<ManifestPath, ManifestError> {
    let path: &str = entry
        .get("path")
        .and_then(|v| v.as_str())
        .ok_or(ValidationError::EmptyPath)?;
    if path.is_empty() {
        return Err(ValidationError::EmptyPath.into());
    }

    let hash: &str = entry.get("hash").and_then(|v| v.as_str()).ok_or_else(|| {
        ValidationError::MissingPathField {
            path: path.to_string(),
            field: "hash",
        }
    })?;
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::NonAlphanumericHash {
            path: path.to_string(),
            hash: hash.to_string(),
        }
        .into());
    }

    let size: u64 = entry.get("size").and_then(|v| v.as_u64()).ok_or_else(|| {
        ValidationError::MissingPathField {
            path: path.to_string(),
            field: "size",
        }
    })?;

    let mtime: i64 = entry.get("mtime").and_then(|v| v.as_i64()).ok_or_else(|| {
        ValidationError::MissingPathField {
            path: path.to_string(),
            field: "mtime",
        }
    })?;

    Ok(ManifestPath {
        path: path.to_string(),
        hash: hash.to_string(),
        size,
        mtime,
    })
}
