//! Submission-side asset manager: group, hash, upload.

use std::path::{Path, PathBuf};

use farmsync_filesystem::PathFormat;
use farmsync_model::{AssetManifest, Manifest};
use farmsync_storage::{
    HashCache, ProgressCallback, ProgressStatus, ProgressTracker, S3CheckCache, S3Location,
    StorageSettings, SummaryStatistics, UploadOrchestrator,
};

use crate::error::SyncError;
use crate::grouping;
use crate::hashing::build_manifest_entries;
use crate::types::{
    AssetRootGroup, AssetRootManifest, AssetUploadGroup, Attachments, JobAttachmentsFileSystem,
    ManifestProperties, StorageProfile,
};

/// Drives the submission workflow: `prepare_paths_for_upload` groups
/// declared paths by asset root, `hash_assets_and_create_manifests` turns
/// each group into a manifest using the hash cache, and `upload_assets`
/// pushes content and manifests to the store and produces the `Attachments`
/// payload for job creation.
pub struct AssetManager<'a, C: farmsync_storage::StorageClient> {
    client: &'a C,
    farm_id: String,
    queue_id: String,
    location: S3Location,
    settings: StorageSettings,
}

impl<'a, C: farmsync_storage::StorageClient> AssetManager<'a, C> {
    /// Create an asset manager for one farm/queue.
    pub fn new(
        client: &'a C,
        farm_id: impl Into<String>,
        queue_id: impl Into<String>,
        location: S3Location,
    ) -> Self {
        Self {
            client,
            farm_id: farm_id.into(),
            queue_id: queue_id.into(),
            location,
            settings: StorageSettings::default(),
        }
    }

    /// Override the transfer settings.
    pub fn with_settings(mut self, settings: StorageSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Group declared paths by asset root.
    ///
    /// # Errors
    /// `SyncError::MisconfiguredInputs` when a declared input does not
    /// exist (and `require_paths_exist` is set) or is a directory.
    pub fn prepare_paths_for_upload(
        &self,
        input_paths: &[PathBuf],
        output_paths: &[PathBuf],
        referenced_paths: &[PathBuf],
        storage_profile: Option<&StorageProfile>,
        require_paths_exist: bool,
    ) -> Result<AssetUploadGroup, SyncError> {
        grouping::prepare_paths_for_upload(
            input_paths,
            output_paths,
            referenced_paths,
            storage_profile,
            require_paths_exist,
        )
    }

    /// Hash every grouped input (cache hits skip the read) and build one
    /// manifest per asset root.
    ///
    /// # Errors
    /// `SyncError::Cancelled` with partial statistics when the callback
    /// cancels mid-hash.
    pub async fn hash_assets_and_create_manifests(
        &self,
        upload_group: &AssetUploadGroup,
        hash_cache: &HashCache,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(SummaryStatistics, Vec<AssetRootManifest>), SyncError> {
        let tracker: ProgressTracker =
            ProgressTracker::new(ProgressStatus::PreparingInProgress, callback);
        tracker.set_totals(
            upload_group.total_input_files,
            upload_group.total_input_bytes,
        );

        let mut manifests: Vec<AssetRootManifest> = Vec::new();
        for group in &upload_group.asset_groups {
            manifests.push(self.manifest_for_group(group, hash_cache, &tracker).await?);
        }

        Ok((tracker.summary_statistics(), manifests))
    }

    async fn manifest_for_group(
        &self,
        group: &AssetRootGroup,
        hash_cache: &HashCache,
        tracker: &ProgressTracker<'_>,
    ) -> Result<AssetRootManifest, SyncError> {
        let asset_manifest: Option<Manifest> = if group.inputs.is_empty() {
            None
        } else {
            let mut files: Vec<PathBuf> = group.inputs.iter().cloned().collect();
            files.sort();
            let entries =
                build_manifest_entries(&files, Path::new(&group.root_path), hash_cache, tracker)
                    .await?;
            Some(Manifest::V2023_03_03(AssetManifest::new(entries)))
        };

        let mut outputs: Vec<PathBuf> = group.outputs.iter().cloned().collect();
        outputs.sort();

        Ok(AssetRootManifest {
            file_system_location_name: group.file_system_location_name.clone(),
            root_path: group.root_path.clone(),
            asset_manifest,
            outputs,
        })
    }

    /// Upload all content objects and manifests, returning the attachments
    /// payload for job creation.
    ///
    /// Content objects are written first and each manifest last, so a
    /// stored manifest never names missing content.
    pub async fn upload_assets(
        &self,
        manifests: &[AssetRootManifest],
        file_system: JobAttachmentsFileSystem,
        s3_check_cache: &S3CheckCache,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(SummaryStatistics, Attachments), SyncError> {
        let orchestrator: UploadOrchestrator<'_, C> =
            UploadOrchestrator::new(self.client, self.location.clone())
                .with_settings(self.settings.clone());

        let mut statistics: SummaryStatistics = SummaryStatistics::default();
        let mut properties: Vec<ManifestProperties> = Vec::new();

        for root_manifest in manifests {
            let root_path: &Path = Path::new(&root_manifest.root_path);
            let output_relative: Vec<String> = root_manifest
                .outputs
                .iter()
                .filter_map(|output| output.strip_prefix(root_path).ok())
                .map(|relative| relative.to_string_lossy().replace('\\', "/"))
                .collect();

            let mut manifest_properties: ManifestProperties = ManifestProperties {
                root_path: root_manifest.root_path.clone(),
                root_path_format: PathFormat::host(),
                input_manifest_path: None,
                input_manifest_hash: None,
                output_relative_directories: if output_relative.is_empty() {
                    None
                } else {
                    Some(output_relative)
                },
                file_system_location_name: root_manifest.file_system_location_name.clone(),
            };

            if let Some(manifest) = &root_manifest.asset_manifest {
                let upload_statistics: SummaryStatistics = orchestrator
                    .upload_manifest_contents(manifest, root_path, s3_check_cache, callback)
                    .await?;
                statistics = statistics.aggregate(&upload_statistics);

                let partial_prefix: String = self
                    .location
                    .partial_input_manifest_prefix(&self.farm_id, &self.queue_id);
                let upload_result = orchestrator
                    .upload_manifest(
                        manifest,
                        &partial_prefix,
                        &root_manifest.root_path,
                        root_manifest.file_system_location_name.as_deref(),
                    )
                    .await?;
                manifest_properties.input_manifest_path = Some(upload_result.partial_key);
                manifest_properties.input_manifest_hash = Some(upload_result.manifest_hash);
            }

            properties.push(manifest_properties);
        }

        Ok((
            statistics,
            Attachments {
                manifests: properties,
                file_system,
            },
        ))
    }
}
