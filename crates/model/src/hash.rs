//! Hash algorithm definitions and content hashing.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::error::ManifestError;

/// Read buffer size for streaming file hashing.
const HASH_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Supported hashing algorithms for file content.
///
/// The manifest format records the algorithm by name, so adding an algorithm
/// means adding a variant here and extending the match arms below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// The xxhash 128-bit (XXH3) algorithm, hex-encoded to 32 characters.
    #[serde(rename = "xxh128")]
    Xxh128,
}

impl HashAlgorithm {
    /// Get the string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh128 => "xxh128",
        }
    }

    /// Get the file extension used for objects in content-addressed storage.
    pub fn extension(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh128 => "xxh128",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hash a byte slice with the given algorithm.
///
/// # Arguments
/// * `data` - Bytes to hash
/// * `algorithm` - Hash algorithm to use
///
/// # Returns
/// Lowercase hex digest string.
pub fn hash_data(data: &[u8], algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Xxh128 => {
            let mut hasher: Xxh3 = Xxh3::new();
            hasher.update(data);
            format!("{:032x}", hasher.digest128())
        }
    }
}

/// Hash a file's content with the given algorithm, streaming in fixed-size
/// reads so large files are never held in memory.
///
/// # Arguments
/// * `path` - File to hash
/// * `algorithm` - Hash algorithm to use
///
/// # Returns
/// Lowercase hex digest string.
///
/// # Errors
/// Returns `ManifestError::HashIo` if the file cannot be read.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String, ManifestError> {
    match algorithm {
        HashAlgorithm::Xxh128 => {
            let mut file: std::fs::File =
                std::fs::File::open(path).map_err(|source| ManifestError::HashIo {
                    path: path.display().to_string(),
                    source,
                })?;
            let mut hasher: Xxh3 = Xxh3::new();
            let mut buffer: [u8; HASH_READ_BUFFER_SIZE] = [0u8; HASH_READ_BUFFER_SIZE];
            loop {
                let read: usize =
                    file.read(&mut buffer)
                        .map_err(|source| ManifestError::HashIo {
                            path: path.display().to_string(),
                            source,
                        })?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(format!("{:032x}", hasher.digest128()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_algorithm_strings() {
        assert_eq!(HashAlgorithm::Xxh128.as_str(), "xxh128");
        assert_eq!(HashAlgorithm::Xxh128.extension(), "xxh128");
        assert_eq!(HashAlgorithm::Xxh128.to_string(), "xxh128");
    }

    #[test]
    fn test_hash_data_is_stable() {
        let first: String = hash_data(b"render frame data", HashAlgorithm::Xxh128);
        let second: String = hash_data(b"render frame data", HashAlgorithm::Xxh128);
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_hash_data_differs_by_content() {
        let a: String = hash_data(b"frame-0001", HashAlgorithm::Xxh128);
        let b: String = hash_data(b"frame-0002", HashAlgorithm::Xxh128);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_file_matches_hash_data() {
        let dir: TempDir = TempDir::new().unwrap();
        let file_path = dir.path().join("scene.ma");
        let mut file = std::fs::File::create(&file_path).unwrap();
        file.write_all(b"polygon soup").unwrap();
        drop(file);

        let from_file: String = hash_file(&file_path, HashAlgorithm::Xxh128).unwrap();
        let from_data: String = hash_data(b"polygon soup", HashAlgorithm::Xxh128);
        assert_eq!(from_file, from_data);
    }

    #[test]
    fn test_hash_file_missing() {
        let result = hash_file(Path::new("/nonexistent/scene.ma"), HashAlgorithm::Xxh128);
        assert!(matches!(result, Err(ManifestError::HashIo { .. })));
    }
}
