//! Manifest decoding with version detection.

use serde_json::Value;

use crate::error::ManifestError;
use crate::version::ManifestVersion;
use crate::Manifest;

/// Decode a manifest from a JSON string, dispatching on its version field.
///
/// Unknown versions fail fast, naming the supported versions; the manifest
/// body is validated before being returned.
pub fn decode_manifest(json: &str) -> Result<Manifest, ManifestError> {
    let data: Value = serde_json::from_str(json)?;

    let version_str: &str = data
        .get("manifestVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ManifestError::unknown_version("<missing manifestVersion>"))?;

    let version: ManifestVersion = serde_json::from_value(Value::String(version_str.to_string()))
        .map_err(|_| ManifestError::unknown_version(version_str))?;

    match version {
        ManifestVersion::V2023_03_03 => {
            let manifest = crate::v2023_03_03::AssetManifest::decode(&data)?;
            Ok(Manifest::V2023_03_03(manifest))
        }
    }
}
