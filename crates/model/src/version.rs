//! Manifest format versions.

use serde::{Deserialize, Serialize};

/// Supported manifest format versions.
///
/// Decoding dispatches on this tag through a closed match, so supporting a
/// new format is an explicit extension of this enum and of
/// `decode::decode_manifest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum ManifestVersion {
    #[serde(rename = "2023-03-03")]
    V2023_03_03,
}

impl ManifestVersion {
    /// Get the string representation of the version.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestVersion::V2023_03_03 => "2023-03-03",
        }
    }

    /// All versions this library can decode, for error messages.
    pub fn supported_versions() -> &'static [&'static str] {
        &["2023-03-03"]
    }
}

impl std::fmt::Display for ManifestVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string() {
        assert_eq!(ManifestVersion::V2023_03_03.as_str(), "2023-03-03");
        assert_eq!(ManifestVersion::V2023_03_03.to_string(), "2023-03-03");
    }

    #[test]
    fn test_version_serde_rename() {
        let json: String = serde_json::to_string(&ManifestVersion::V2023_03_03).unwrap();
        assert_eq!(json, "\"2023-03-03\"");

        let parsed: ManifestVersion = serde_json::from_str("\"2023-03-03\"").unwrap();
        assert_eq!(parsed, ManifestVersion::V2023_03_03);
    }

    #[test]
    fn test_supported_versions_listed() {
        assert!(ManifestVersion::supported_versions().contains(&"2023-03-03"));
    }
}
