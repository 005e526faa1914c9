//! Attachment types exchanged with the control plane.

use std::collections::HashSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use farmsync_filesystem::PathFormat;
use farmsync_model::Manifest;
use farmsync_storage::S3Location;

use crate::error::SyncError;

/// How a worker makes job inputs available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobAttachmentsFileSystem {
    /// Download every input before the job runs.
    #[default]
    Copied,
    /// Mount a lazy virtual filesystem and fetch content on demand.
    Virtual,
}

/// Properties of one asset root's manifest, handed to job submission.
///
/// Serializes to the camelCase wire format the control plane expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestProperties {
    /// Root path the manifest entries are relative to, on the submitting
    /// machine.
    pub root_path: String,
    /// Path format of the submitting machine.
    pub root_path_format: PathFormat,
    /// Key of the uploaded manifest below the manifest folder prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_manifest_path: Option<String>,
    /// Hash of the manifest content, for provenance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_manifest_hash: Option<String>,
    /// Expected output directories, relative to the root path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_relative_directories: Option<Vec<String>>,
    /// Storage-profile location name the root belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_system_location_name: Option<String>,
}

/// The job attachments payload for a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachments {
    /// One entry per asset root.
    pub manifests: Vec<ManifestProperties>,
    /// Loading mode for the job's inputs.
    pub file_system: JobAttachmentsFileSystem,
}

impl Default for Attachments {
    fn default() -> Self {
        Self {
            manifests: Vec::new(),
            file_system: JobAttachmentsFileSystem::Copied,
        }
    }
}

/// Transient grouping of declared paths sharing one asset root.
#[derive(Debug, Clone, Default)]
pub struct AssetRootGroup {
    /// Storage-profile location name this group belongs to, if any.
    pub file_system_location_name: Option<String>,
    /// Common root of every member path.
    pub root_path: String,
    /// Input files (must exist, are uploaded).
    pub inputs: HashSet<PathBuf>,
    /// Output directories (need not exist yet).
    pub outputs: HashSet<PathBuf>,
    /// Paths that establish a root without being uploaded.
    pub references: HashSet<PathBuf>,
}

/// All asset-root groups of a submission plus input totals for progress
/// reporting.
#[derive(Debug, Clone, Default)]
pub struct AssetUploadGroup {
    pub asset_groups: Vec<AssetRootGroup>,
    pub total_input_files: u64,
    pub total_input_bytes: u64,
}

/// A manifest (or none, for output-only roots) with its root and outputs.
#[derive(Debug, Clone)]
pub struct AssetRootManifest {
    /// Storage-profile location name, if any.
    pub file_system_location_name: Option<String>,
    /// Root path the manifest was built from.
    pub root_path: String,
    /// The manifest; `None` when the root has outputs but no inputs.
    pub asset_manifest: Option<Manifest>,
    /// Output directories, absolute.
    pub outputs: Vec<PathBuf>,
}

/// Kind of a storage-profile file system location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileSystemLocationType {
    /// Present on every relevant host; never uploaded.
    Shared,
    /// Local to the submitting machine; uploaded and grouped by location.
    Local,
}

/// A named file system location in a storage profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemLocation {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub location_type: FileSystemLocationType,
}

/// Storage profile attached to a queue, classifying well-known roots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageProfile {
    #[serde(default)]
    pub file_system_locations: Vec<FileSystemLocation>,
}

impl StorageProfile {
    /// Split locations into (local path -> name, shared paths).
    pub fn locations_by_type(&self) -> (Vec<(String, String)>, Vec<String>) {
        let mut local: Vec<(String, String)> = Vec::new();
        let mut shared: Vec<String> = Vec::new();
        for location in &self.file_system_locations {
            match location.location_type {
                FileSystemLocationType::Local => {
                    local.push((location.path.clone(), location.name.clone()));
                }
                FileSystemLocationType::Shared => shared.push(location.path.clone()),
            }
        }
        (local, shared)
    }
}

/// Control-plane metadata the sync workflows consume.
///
/// The real implementation calls the farm's API; tests supply an in-memory
/// double. Only the calls the attachment workflows need are modeled.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Attachment settings configured on a queue, if any.
    async fn queue_attachment_settings(
        &self,
        farm_id: &str,
        queue_id: &str,
    ) -> Result<Option<S3Location>, SyncError>;

    /// Attachments recorded on a job, if any.
    async fn job_attachments(
        &self,
        farm_id: &str,
        queue_id: &str,
        job_id: &str,
    ) -> Result<Option<Attachments>, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachments_serialize_camel_case() {
        let attachments: Attachments = Attachments {
            manifests: vec![ManifestProperties {
                root_path: "/projects/shot01".to_string(),
                root_path_format: PathFormat::Posix,
                input_manifest_path: Some("farm-1/queue-1/Inputs/guid/abc_input".to_string()),
                input_manifest_hash: Some("abc123".to_string()),
                output_relative_directories: Some(vec!["renders".to_string()]),
                file_system_location_name: None,
            }],
            file_system: JobAttachmentsFileSystem::Copied,
        };

        let json: String = serde_json::to_string(&attachments).unwrap();
        assert!(json.contains("\"rootPath\""));
        assert!(json.contains("\"rootPathFormat\":\"posix\""));
        assert!(json.contains("\"fileSystem\":\"COPIED\""));
        assert!(json.contains("\"inputManifestPath\""));
    }

    #[test]
    fn test_manifest_properties_omit_absent_fields() {
        let props: ManifestProperties = ManifestProperties {
            root_path: "/projects".to_string(),
            root_path_format: PathFormat::Posix,
            input_manifest_path: None,
            input_manifest_hash: None,
            output_relative_directories: None,
            file_system_location_name: None,
        };
        let json: String = serde_json::to_string(&props).unwrap();
        assert!(!json.contains("inputManifestPath"));
        assert!(!json.contains("outputRelativeDirectories"));
    }

    #[test]
    fn test_attachments_file_system_roundtrip() {
        let json: &str = r#"{"manifests":[],"fileSystem":"VIRTUAL"}"#;
        let attachments: Attachments = serde_json::from_str(json).unwrap();
        assert_eq!(attachments.file_system, JobAttachmentsFileSystem::Virtual);
    }

    #[test]
    fn test_storage_profile_locations_by_type() {
        let profile: StorageProfile = StorageProfile {
            file_system_locations: vec![
                FileSystemLocation {
                    name: "Assets".to_string(),
                    path: "/mnt/assets".to_string(),
                    location_type: FileSystemLocationType::Local,
                },
                FileSystemLocation {
                    name: "NetworkCache".to_string(),
                    path: "/net/cache".to_string(),
                    location_type: FileSystemLocationType::Shared,
                },
            ],
        };

        let (local, shared): (Vec<(String, String)>, Vec<String>) = profile.locations_by_type();
        assert_eq!(local, vec![("/mnt/assets".to_string(), "Assets".to_string())]);
        assert_eq!(shared, vec!["/net/cache".to_string()]);
    }
}
