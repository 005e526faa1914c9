//! Downloading a job's declared output files.

use std::collections::HashMap;
use std::path::Path;

use farmsync_filesystem::{ensure_paths_within_directory, to_absolute};
use farmsync_model::{merge_manifests, Manifest};
use farmsync_storage::{
    download_files_from_manifests, output_manifests_by_asset_root, ConflictResolution,
    DownloadSummaryStatistics, ProgressCallback, S3Location, StorageSettings,
};

use crate::error::SyncError;

/// Downloads the output files a job produced, optionally narrowed to one
/// step or task.
///
/// Output manifests are discovered under the job's manifest prefix at the
/// requested scope and merged per original asset root. Destination roots
/// default to those recorded roots; `set_root_path` remaps one before
/// downloading.
pub struct OutputDownloader<'a, C: farmsync_storage::StorageClient> {
    client: &'a C,
    location: S3Location,
    settings: StorageSettings,
    outputs_by_root: HashMap<String, Manifest>,
}

impl<'a, C: farmsync_storage::StorageClient> OutputDownloader<'a, C> {
    /// Discover output manifests for a job (optionally one step, optionally
    /// one task) and build a downloader over them.
    pub async fn new(
        client: &'a C,
        location: S3Location,
        settings: StorageSettings,
        farm_id: &str,
        queue_id: &str,
        job_id: &str,
        step_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<Self, SyncError> {
        let discovered: HashMap<String, Vec<Manifest>> = output_manifests_by_asset_root(
            client,
            &location,
            &settings.retry,
            farm_id,
            queue_id,
            job_id,
            step_id,
            task_id,
        )
        .await?;

        let mut outputs_by_root: HashMap<String, Manifest> = HashMap::new();
        for (root, manifests) in discovered {
            if let Some(merged) = merge_manifests(&manifests)? {
                outputs_by_root.insert(root, merged);
            }
        }

        Ok(Self {
            client,
            location,
            settings,
            outputs_by_root,
        })
    }

    /// The relative output paths that will be written, per destination
    /// root.
    pub fn output_paths_by_root(&self) -> HashMap<String, Vec<String>> {
        self.outputs_by_root
            .iter()
            .map(|(root, manifest)| {
                (
                    root.clone(),
                    manifest.paths().map(|p| p.path.clone()).collect(),
                )
            })
            .collect()
    }

    /// Redirect one recorded root to a different local directory. When the
    /// new root is already in use its manifests merge (later entries win).
    ///
    /// # Errors
    /// `SyncError::UnknownOutputRoot` when `original_root` is not among the
    /// discovered roots.
    pub fn set_root_path(
        &mut self,
        original_root: &str,
        new_root: &Path,
    ) -> Result<(), SyncError> {
        let new_root: String = to_absolute(new_root)?.display().to_string();

        let manifest: Manifest =
            self.outputs_by_root
                .remove(original_root)
                .ok_or_else(|| SyncError::UnknownOutputRoot {
                    root_path: original_root.to_string(),
                })?;

        match self.outputs_by_root.remove(&new_root) {
            Some(existing) => {
                if let Some(merged) = merge_manifests(&[existing, manifest])? {
                    self.outputs_by_root.insert(new_root, merged);
                }
            }
            None => {
                self.outputs_by_root.insert(new_root, manifest);
            }
        }
        Ok(())
    }

    /// Download all discovered outputs into their destination roots.
    ///
    /// Every relative path is validated to stay inside its root before any
    /// write happens.
    pub async fn download_job_output(
        &self,
        conflict_resolution: ConflictResolution,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<DownloadSummaryStatistics, SyncError> {
        for (root, manifest) in &self.outputs_by_root {
            let relative: Vec<&str> = manifest.paths().map(|p| p.path.as_str()).collect();
            ensure_paths_within_directory(Path::new(root), &relative)?;
        }

        Ok(download_files_from_manifests(
            self.client,
            &self.location,
            &self.outputs_by_root,
            &self.settings,
            conflict_resolution,
            callback,
        )
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmsync_model::{hash_data, AssetManifest, HashAlgorithm, ManifestPath};
    use farmsync_storage::{MemoryStorageClient, StorageClient, ASSET_ROOT_METADATA_KEY};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn location() -> S3Location {
        S3Location::new("assets", "farm/ja").unwrap()
    }

    /// Seed one task output manifest plus its content objects.
    async fn seed_output(
        client: &MemoryStorageClient,
        manifest_key: &str,
        asset_root: &str,
        files: &[(&str, &[u8])],
    ) {
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
        let mut metadata: HashMap<String, String> = HashMap::new();
        metadata.insert(ASSET_ROOT_METADATA_KEY.to_string(), asset_root.to_string());
        client
            .put_object(
                "assets",
                manifest_key,
                manifest.encode().unwrap().into_bytes(),
                Some(&metadata),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_discovers_and_downloads_job_outputs() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let dest: TempDir = TempDir::new().unwrap();
        let dest_str: String = dest.path().display().to_string();
        seed_output(
            &client,
            "farm/ja/Manifests/f/q/j/s/task-1/sess_output",
            &dest_str,
            &[("renders/frame1.exr", b"pixels")],
        )
        .await;

        let downloader = OutputDownloader::new(
            &client,
            location(),
            StorageSettings::default(),
            "f",
            "q",
            "j",
            None,
            None,
        )
        .await
        .unwrap();

        let paths: HashMap<String, Vec<String>> = downloader.output_paths_by_root();
        assert_eq!(paths[&dest_str], vec!["renders/frame1.exr".to_string()]);

        let stats: DownloadSummaryStatistics = downloader
            .download_job_output(ConflictResolution::CreateCopy, None)
            .await
            .unwrap();

        assert_eq!(stats.summary.processed_files, 1);
        assert_eq!(
            std::fs::read(dest.path().join("renders/frame1.exr")).unwrap(),
            b"pixels"
        );
    }

    #[tokio::test]
    async fn test_set_root_path_redirects_downloads() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        seed_output(
            &client,
            "farm/ja/Manifests/f/q/j/s/task-1/sess_output",
            "/original/submit/root",
            &[("out.txt", b"output")],
        )
        .await;

        let mut downloader = OutputDownloader::new(
            &client,
            location(),
            StorageSettings::default(),
            "f",
            "q",
            "j",
            None,
            None,
        )
        .await
        .unwrap();

        let dest: TempDir = TempDir::new().unwrap();
        downloader
            .set_root_path("/original/submit/root", dest.path())
            .unwrap();
        downloader
            .download_job_output(ConflictResolution::CreateCopy, None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(dest.path().join("out.txt")).unwrap(), b"output");
    }

    #[tokio::test]
    async fn test_set_root_path_unknown_root_fails() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let mut downloader = OutputDownloader::new(
            &client,
            location(),
            StorageSettings::default(),
            "f",
            "q",
            "j",
            None,
            None,
        )
        .await
        .unwrap();

        let result = downloader.set_root_path("/not/a/root", Path::new("/tmp/elsewhere"));
        assert!(matches!(result, Err(SyncError::UnknownOutputRoot { .. })));
    }

    #[tokio::test]
    async fn test_step_scope_excludes_other_steps() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        seed_output(
            &client,
            "farm/ja/Manifests/f/q/j/step-1/task-1/a_output",
            "/roots/one",
            &[("a.txt", b"a")],
        )
        .await;
        seed_output(
            &client,
            "farm/ja/Manifests/f/q/j/step-2/task-1/b_output",
            "/roots/two",
            &[("b.txt", b"b")],
        )
        .await;

        let downloader = OutputDownloader::new(
            &client,
            location(),
            StorageSettings::default(),
            "f",
            "q",
            "j",
            Some("step-1"),
            None,
        )
        .await
        .unwrap();

        let paths: HashMap<String, Vec<String>> = downloader.output_paths_by_root();
        assert_eq!(paths.len(), 1);
        assert!(paths.contains_key("/roots/one"));
    }

    #[tokio::test]
    async fn test_manifest_path_escaping_root_is_rejected() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let dest: TempDir = TempDir::new().unwrap();
        let dest_str: String = dest.path().display().to_string();
        seed_output(
            &client,
            "farm/ja/Manifests/f/q/j/s/task-1/sess_output",
            &dest_str,
            &[("../escape.txt", b"bad")],
        )
        .await;

        let downloader = OutputDownloader::new(
            &client,
            location(),
            StorageSettings::default(),
            "f",
            "q",
            "j",
            None,
            None,
        )
        .await
        .unwrap();

        let result: Result<DownloadSummaryStatistics, SyncError> = downloader
            .download_job_output(ConflictResolution::CreateCopy, None)
            .await;
        assert!(matches!(
            result,
            Err(SyncError::FileSystem(
                farmsync_filesystem::FileSystemError::PathOutsideRoot { .. }
            ))
        ));
        assert!(!dest.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_multiple_task_manifests_merge_per_root() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let dest: TempDir = TempDir::new().unwrap();
        let dest_str: String = dest.path().display().to_string();
        seed_output(
            &client,
            "farm/ja/Manifests/f/q/j/s/task-1/a_output",
            &dest_str,
            &[("frames/f1.exr", b"one")],
        )
        .await;
        seed_output(
            &client,
            "farm/ja/Manifests/f/q/j/s/task-2/b_output",
            &dest_str,
            &[("frames/f2.exr", b"two")],
        )
        .await;

        let downloader = OutputDownloader::new(
            &client,
            location(),
            StorageSettings::default(),
            "f",
            "q",
            "j",
            None,
            None,
        )
        .await
        .unwrap();

        let mut paths: Vec<String> = downloader
            .output_paths_by_root()
            .remove(&dest_str)
            .unwrap();
        paths.sort();
        assert_eq!(paths, vec!["frames/f1.exr", "frames/f2.exr"]);
    }
}
