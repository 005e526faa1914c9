//! Worker-side input synchronization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use farmsync_filesystem::{
    ensure_paths_within_directory, set_fs_permissions, unique_dest_dir_name, PathMappingRule,
    PermissionSettings,
};
use farmsync_model::{merge_manifests, Manifest};
use farmsync_storage::{
    download_files_from_manifests, download_manifest, output_manifests_by_asset_root,
    ConflictResolution, DownloadSummaryStatistics, ProgressCallback, S3Location, StorageSettings,
};
use farmsync_vfs::{
    find_vfs_executable, VfsMountSettings, VfsProcessManager, VFS_CACHE_FOLDER_IN_SESSION,
    VFS_MANIFEST_FOLDER_IN_SESSION,
};

use crate::error::SyncError;
use crate::types::{Attachments, ControlPlaneClient, JobAttachmentsFileSystem};

/// Options for an input sync.
#[derive(Debug, Clone, Default)]
pub struct SyncInputsOptions {
    /// Destination-root overrides for storage-profile roots: source root on
    /// the submitting machine to local root on this machine. When a
    /// manifest names a file-system location and no override covers its
    /// root, the sync fails rather than guessing.
    pub path_mapping_overrides: HashMap<String, String>,
    /// Steps whose output manifests are downloaded over the job inputs.
    pub step_dependencies: Vec<String>,
    /// Permission settings applied to the downloaded trees.
    pub permission_settings: Option<PermissionSettings>,
    /// Conflict handling for files already present.
    pub conflict_resolution: ConflictResolution,
    /// Transfer settings.
    pub settings: StorageSettings,
}

/// Download (or virtually mount) all input files of a job into destination
/// roots under `session_dir`.
///
/// Manifests are fetched per asset root, step-dependency output manifests
/// are merged over them (later entries win), and each merged manifest is
/// materialized under either an explicit path-mapping override or a stable
/// `assetroot-<hash>` directory. Returns download statistics and the path
/// mapping rules describing where each source root landed.
///
/// With `fileSystem: VIRTUAL` attachments (POSIX hosts with the mount
/// executable installed), the manifests are mounted lazily instead and the
/// returned statistics are empty since no download has happened yet.
pub async fn sync_inputs<C: farmsync_storage::StorageClient>(
    client: &C,
    s3_settings: Option<&S3Location>,
    attachments: Option<&Attachments>,
    farm_id: &str,
    queue_id: &str,
    job_id: &str,
    session_dir: &Path,
    options: &SyncInputsOptions,
    callback: Option<&dyn ProgressCallback>,
) -> Result<(DownloadSummaryStatistics, Vec<PathMappingRule>), SyncError> {
    let Some(location) = s3_settings else {
        info!(queue_id, "no attachment settings configured for queue, nothing to sync");
        return Ok((DownloadSummaryStatistics::default(), Vec::new()));
    };
    let Some(attachments) = attachments else {
        info!(job_id, "no attachments configured for job, nothing to sync");
        return Ok((DownloadSummaryStatistics::default(), Vec::new()));
    };

    let mut grouped_by_root: HashMap<String, Vec<Manifest>> = HashMap::new();
    let mut mapping_rules: Vec<PathMappingRule> = Vec::new();

    for properties in &attachments.manifests {
        let local_root: String = if !options.path_mapping_overrides.is_empty()
            && properties.file_system_location_name.is_some()
        {
            options
                .path_mapping_overrides
                .get(&properties.root_path)
                .cloned()
                .ok_or_else(|| SyncError::NoPathMappingRule {
                    source_path: properties.root_path.clone(),
                })?
        } else {
            let dir_name: String = unique_dest_dir_name(&properties.root_path);
            let local_root: String = session_dir.join(&dir_name).display().to_string();
            mapping_rules.push(PathMappingRule {
                source_path_format: properties.root_path_format,
                source_path: properties.root_path.clone(),
                destination_path: local_root.clone(),
            });
            local_root
        };

        if let Some(partial_key) = &properties.input_manifest_path {
            let full_key: String = location.add_manifest_folder_prefix(partial_key);
            let manifest: Manifest =
                download_manifest(client, location, &options.settings.retry, &full_key).await?;
            grouped_by_root.entry(local_root).or_default().push(manifest);
        }
    }

    for step_id in &options.step_dependencies {
        let step_outputs: HashMap<String, Vec<Manifest>> = output_manifests_by_asset_root(
            client,
            location,
            &options.settings.retry,
            farm_id,
            queue_id,
            job_id,
            Some(step_id),
            None,
        )
        .await?;
        for (root, manifests) in step_outputs {
            let local_root: String = session_dir
                .join(unique_dest_dir_name(&root))
                .display()
                .to_string();
            grouped_by_root.entry(local_root).or_default().extend(manifests);
        }
    }

    // One manifest per destination root, later manifests overriding earlier
    // ones (step outputs over job inputs).
    let mut merged_by_root: HashMap<String, Manifest> = HashMap::new();
    for (root, manifests) in grouped_by_root {
        if let Some(merged) = merge_manifests(&manifests)? {
            merged_by_root.insert(root, merged);
        }
    }

    for (root, manifest) in &merged_by_root {
        let relative: Vec<&str> = manifest.paths().map(|p| p.path.as_str()).collect();
        ensure_paths_within_directory(Path::new(root), &relative)?;
    }

    if attachments.file_system == JobAttachmentsFileSystem::Virtual {
        match find_vfs_executable() {
            Ok(_) => {
                mount_virtual(location, &merged_by_root, session_dir).await?;
                return Ok((DownloadSummaryStatistics::default(), mapping_rules));
            }
            Err(error) => {
                warn!(%error, "virtual filesystem unavailable, falling back to eager download");
            }
        }
    }

    let statistics: DownloadSummaryStatistics = download_files_from_manifests(
        client,
        location,
        &merged_by_root,
        &options.settings,
        options.conflict_resolution,
        callback,
    )
    .await?;

    if let Some(permission_settings) = &options.permission_settings {
        for (root, manifest) in &merged_by_root {
            let root_path: &Path = Path::new(root);
            let downloaded: Vec<PathBuf> = manifest
                .paths()
                .map(|entry| root_path.join(&entry.path))
                .filter(|path| path.exists())
                .collect();
            set_fs_permissions(&downloaded, root_path, permission_settings)?;
        }
    }

    Ok((statistics, mapping_rules))
}

/// Mount each merged manifest as a lazy virtual filesystem at its
/// destination root.
async fn mount_virtual(
    location: &S3Location,
    merged_by_root: &HashMap<String, Manifest>,
    session_dir: &Path,
) -> Result<(), SyncError> {
    let manifest_dir: PathBuf = session_dir.join(VFS_MANIFEST_FOLDER_IN_SESSION);
    let cache_dir: PathBuf = session_dir.join(VFS_CACHE_FOLDER_IN_SESSION);
    std::fs::create_dir_all(&manifest_dir)
        .map_err(|e| farmsync_filesystem::FileSystemError::io_error(manifest_dir.display().to_string(), e))?;
    std::fs::create_dir_all(&cache_dir)
        .map_err(|e| farmsync_filesystem::FileSystemError::io_error(cache_dir.display().to_string(), e))?;

    for (root, manifest) in merged_by_root {
        // Replace a live mount at the same point, merging its manifest so
        // already-mounted inputs stay visible.
        let mut mount_manifest: Manifest = manifest.clone();
        if VfsProcessManager::is_mount(Path::new(root)) {
            if let Some(prior_path) =
                VfsProcessManager::manifest_path_for_mount(session_dir, Path::new(root))
            {
                let prior_text: String = std::fs::read_to_string(&prior_path).map_err(|e| {
                    farmsync_filesystem::FileSystemError::io_error(
                        prior_path.display().to_string(),
                        e,
                    )
                })?;
                let prior: Manifest = Manifest::decode(&prior_text)?;
                if let Some(merged) = merge_manifests(&[prior, manifest.clone()])? {
                    mount_manifest = merged;
                }
            }
            VfsProcessManager::kill_process_at_mount(session_dir, Path::new(root))?;
        }

        let manifest_file: PathBuf =
            manifest_dir.join(format!("{}.manifest", unique_dest_dir_name(root)));
        std::fs::write(&manifest_file, mount_manifest.encode()?).map_err(|e| {
            farmsync_filesystem::FileSystemError::io_error(manifest_file.display().to_string(), e)
        })?;

        let mut manager: VfsProcessManager = VfsProcessManager::new(VfsMountSettings {
            bucket: location.bucket.clone(),
            root_prefix: location.root_prefix.clone(),
            manifest_path: manifest_file,
            mount_point: PathBuf::from(root),
            cache_dir: Some(cache_dir.clone()),
        });

        let session_dir_owned: PathBuf = session_dir.to_path_buf();
        // start() polls the mount point; keep that off the async runtime.
        tokio::task::spawn_blocking(move || manager.start(&session_dir_owned))
            .await
            .map_err(|e| SyncError::TaskFailed(e.to_string()))??;
    }

    Ok(())
}

/// Worker-facing facade that resolves queue settings and job attachments
/// through the control plane before syncing.
pub struct AssetSync<'a, C: farmsync_storage::StorageClient, P: ControlPlaneClient> {
    storage: &'a C,
    control_plane: &'a P,
    farm_id: String,
}

impl<'a, C: farmsync_storage::StorageClient, P: ControlPlaneClient> AssetSync<'a, C, P> {
    /// Create a facade for one farm.
    pub fn new(storage: &'a C, control_plane: &'a P, farm_id: impl Into<String>) -> Self {
        Self {
            storage,
            control_plane,
            farm_id: farm_id.into(),
        }
    }

    /// Fetch the queue's settings and the job's attachments, then sync.
    pub async fn sync_inputs(
        &self,
        queue_id: &str,
        job_id: &str,
        session_dir: &Path,
        options: &SyncInputsOptions,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(DownloadSummaryStatistics, Vec<PathMappingRule>), SyncError> {
        let settings: Option<S3Location> = self
            .control_plane
            .queue_attachment_settings(&self.farm_id, queue_id)
            .await?;
        let attachments: Option<Attachments> = self
            .control_plane
            .job_attachments(&self.farm_id, queue_id, job_id)
            .await?;

        sync_inputs(
            self.storage,
            settings.as_ref(),
            attachments.as_ref(),
            &self.farm_id,
            queue_id,
            job_id,
            session_dir,
            options,
            callback,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use farmsync_filesystem::PathFormat;
    use farmsync_model::{hash_data, AssetManifest, HashAlgorithm, ManifestPath};
    use farmsync_storage::{
        MemoryStorageClient, RetrySettings, StorageClient, ASSET_ROOT_METADATA_KEY,
    };
    use tempfile::TempDir;

    use crate::types::ManifestProperties;

    fn location() -> S3Location {
        S3Location::new("assets", "farm/ja").unwrap()
    }

    /// Seed the store with content plus an input manifest, returning the
    /// attachments that reference it.
    async fn seed_job(
        client: &MemoryStorageClient,
        source_root: &str,
        files: &[(&str, &[u8])],
    ) -> Attachments {
        let loc: S3Location = location();
        let mut entries: Vec<ManifestPath> = Vec::new();
        for (relative, content) in files {
            let hash: String = hash_data(content, HashAlgorithm::Xxh128);
            client.seed(
                "assets",
                &loc.cas_object_key(&hash, HashAlgorithm::Xxh128),
                content.to_vec(),
            );
            entries.push(ManifestPath::new(
                relative.to_string(),
                hash,
                content.len() as u64,
                1_700_000_000_000_000,
            ));
        }
        let manifest: Manifest = Manifest::V2023_03_03(AssetManifest::new(entries));
        let result = farmsync_storage::upload_input_manifest(
            client,
            &loc,
            &RetrySettings::default(),
            &manifest,
            "farm-1/queue-1/Inputs/guid",
            source_root,
            None,
        )
        .await
        .unwrap();

        Attachments {
            manifests: vec![ManifestProperties {
                root_path: source_root.to_string(),
                root_path_format: PathFormat::Posix,
                input_manifest_path: Some(result.partial_key),
                input_manifest_hash: Some(result.manifest_hash),
                output_relative_directories: None,
                file_system_location_name: None,
            }],
            file_system: JobAttachmentsFileSystem::Copied,
        }
    }

    #[tokio::test]
    async fn test_sync_inputs_downloads_into_hashed_root() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let attachments: Attachments = seed_job(
            &client,
            "/projects/shot01",
            &[("scene.ma", b"scene"), ("textures/wood.png", b"wood")],
        )
        .await;
        let session: TempDir = TempDir::new().unwrap();

        let (stats, rules) = sync_inputs(
            &client,
            Some(&location()),
            Some(&attachments),
            "farm-1",
            "queue-1",
            "job-1",
            session.path(),
            &SyncInputsOptions::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].source_path, "/projects/shot01");
        let dest_root: PathBuf = PathBuf::from(&rules[0].destination_path);
        assert!(dest_root.starts_with(session.path()));
        assert_eq!(std::fs::read(dest_root.join("scene.ma")).unwrap(), b"scene");
        assert_eq!(
            std::fs::read(dest_root.join("textures/wood.png")).unwrap(),
            b"wood"
        );
        assert_eq!(stats.summary.processed_files, 2);
        assert_eq!(
            stats.file_counts_by_root_directory[&rules[0].destination_path],
            2
        );
    }

    #[tokio::test]
    async fn test_sync_inputs_without_settings_is_a_noop() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let session: TempDir = TempDir::new().unwrap();

        let (stats, rules) = sync_inputs(
            &client,
            None,
            None,
            "farm-1",
            "queue-1",
            "job-1",
            session.path(),
            &SyncInputsOptions::default(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(stats.summary.processed_files, 0);
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn test_step_dependency_outputs_override_inputs() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let attachments: Attachments =
            seed_job(&client, "/projects/shot01", &[("frame.exr", b"input version")]).await;

        // A previous step re-rendered frame.exr; its output manifest wins.
        let loc: S3Location = location();
        let new_content: &[u8] = b"step output version";
        let new_hash: String = hash_data(new_content, HashAlgorithm::Xxh128);
        client.seed(
            "assets",
            &loc.cas_object_key(&new_hash, HashAlgorithm::Xxh128),
            new_content.to_vec(),
        );
        let output_manifest: Manifest = Manifest::V2023_03_03(AssetManifest::new(vec![
            ManifestPath::new("frame.exr", new_hash, new_content.len() as u64, 2_000_000),
        ]));
        let mut metadata: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        metadata.insert(
            ASSET_ROOT_METADATA_KEY.to_string(),
            "/projects/shot01".to_string(),
        );
        client
            .put_object(
                "assets",
                "farm/ja/Manifests/farm-1/queue-1/job-1/step-1/task-1/sess_output",
                output_manifest.encode().unwrap().into_bytes(),
                Some(&metadata),
            )
            .await
            .unwrap();

        let session: TempDir = TempDir::new().unwrap();
        let options: SyncInputsOptions = SyncInputsOptions {
            step_dependencies: vec!["step-1".to_string()],
            ..Default::default()
        };

        let (_, rules) = sync_inputs(
            &client,
            Some(&loc),
            Some(&attachments),
            "farm-1",
            "queue-1",
            "job-1",
            session.path(),
            &options,
            None,
        )
        .await
        .unwrap();

        let dest_root: PathBuf = PathBuf::from(&rules[0].destination_path);
        assert_eq!(
            std::fs::read(dest_root.join("frame.exr")).unwrap(),
            b"step output version"
        );
    }

    #[tokio::test]
    async fn test_storage_profile_root_requires_mapping_override() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let mut attachments: Attachments =
            seed_job(&client, "/mnt/assets", &[("scene.ma", b"scene")]).await;
        attachments.manifests[0].file_system_location_name = Some("Assets".to_string());

        let session: TempDir = TempDir::new().unwrap();
        let options: SyncInputsOptions = SyncInputsOptions {
            path_mapping_overrides: HashMap::from([(
                "/other/root".to_string(),
                session.path().join("mapped").display().to_string(),
            )]),
            ..Default::default()
        };

        let result = sync_inputs(
            &client,
            Some(&location()),
            Some(&attachments),
            "farm-1",
            "queue-1",
            "job-1",
            session.path(),
            &options,
            None,
        )
        .await;

        assert!(matches!(result, Err(SyncError::NoPathMappingRule { .. })));
    }

    struct FakeControlPlane {
        settings: Option<S3Location>,
        attachments: Option<Attachments>,
    }

    #[async_trait]
    impl ControlPlaneClient for FakeControlPlane {
        async fn queue_attachment_settings(
            &self,
            _farm_id: &str,
            _queue_id: &str,
        ) -> Result<Option<S3Location>, SyncError> {
            Ok(self.settings.clone())
        }

        async fn job_attachments(
            &self,
            _farm_id: &str,
            _queue_id: &str,
            _job_id: &str,
        ) -> Result<Option<Attachments>, SyncError> {
            Ok(self.attachments.clone())
        }
    }

    #[tokio::test]
    async fn test_asset_sync_resolves_metadata_through_control_plane() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let attachments: Attachments =
            seed_job(&client, "/projects/shot01", &[("scene.ma", b"scene")]).await;
        let control_plane: FakeControlPlane = FakeControlPlane {
            settings: Some(location()),
            attachments: Some(attachments),
        };

        let session: TempDir = TempDir::new().unwrap();
        let asset_sync: AssetSync<'_, _, _> = AssetSync::new(&client, &control_plane, "farm-1");
        let (stats, rules) = asset_sync
            .sync_inputs(
                "queue-1",
                "job-1",
                session.path(),
                &SyncInputsOptions::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(stats.summary.processed_files, 1);
        assert_eq!(rules.len(), 1);
    }
}
