//! Manifest upload, download, and output-manifest discovery.

use std::collections::HashMap;

use tracing::debug;

use farmsync_model::{hash_data, Manifest};

use crate::error::StorageError;
use crate::location::{join_s3_paths, S3Location};
use crate::retry::{with_retries, RetrySettings};
use crate::traits::{ObjectInfo, StorageClient};

/// Object-metadata key recording the asset root an output manifest was
/// produced from.
pub const ASSET_ROOT_METADATA_KEY: &str = "asset-root";

/// Name of an input manifest: a stable hash of the file-system location name
/// (if any) and the source root, so resubmitting the same root overwrites
/// rather than accumulates.
pub fn input_manifest_name(file_system_location_name: Option<&str>, source_root: &str) -> String {
    let seed: String = format!(
        "{}{}",
        file_system_location_name.unwrap_or(""),
        source_root
    );
    let alg = farmsync_model::HashAlgorithm::Xxh128;
    format!("{}_input", hash_data(seed.as_bytes(), alg))
}

/// Result of uploading an input manifest.
#[derive(Debug, Clone)]
pub struct ManifestUploadResult {
    /// Key of the manifest below `<rootPrefix>/Manifests/`.
    pub partial_key: String,
    /// Hash of the encoded manifest bytes, for provenance.
    pub manifest_hash: String,
}

/// Upload an encoded input manifest.
///
/// The manifest is written *after* its data objects by the calling
/// orchestrator, so a manifest key never names content that is not yet
/// present.
pub async fn upload_input_manifest<C: StorageClient>(
    client: &C,
    location: &S3Location,
    retry: &RetrySettings,
    manifest: &Manifest,
    partial_prefix: &str,
    source_root: &str,
    file_system_location_name: Option<&str>,
) -> Result<ManifestUploadResult, StorageError> {
    let encoded: String = manifest.encode()?;
    let name: String = input_manifest_name(file_system_location_name, source_root);
    let partial_key: String = if partial_prefix.is_empty() {
        name
    } else {
        join_s3_paths(partial_prefix, &[&name])
    };
    let full_key: String = location.add_manifest_folder_prefix(&partial_key);

    let manifest_hash: String = hash_data(encoded.as_bytes(), manifest.hash_alg());

    with_retries(retry, "uploading manifest", || {
        let bytes: Vec<u8> = encoded.clone().into_bytes();
        let key = full_key.clone();
        async move {
            client
                .put_object(&location.bucket, &key, bytes, None)
                .await
        }
    })
    .await?;

    debug!(key = %full_key, "uploaded input manifest");

    Ok(ManifestUploadResult {
        partial_key,
        manifest_hash,
    })
}

/// Download and decode a manifest by full key.
pub async fn download_manifest<C: StorageClient>(
    client: &C,
    location: &S3Location,
    retry: &RetrySettings,
    key: &str,
) -> Result<Manifest, StorageError> {
    let bytes: Vec<u8> = with_retries(retry, "downloading manifest", || async {
        client.get_object(&location.bucket, key).await
    })
    .await?;

    let text: String = String::from_utf8(bytes).map_err(|e| StorageError::ClientError {
        action: "downloading manifest".to_string(),
        status_code: 0,
        bucket: location.bucket.clone(),
        key: key.to_string(),
        message: format!("manifest is not valid UTF-8: {e}"),
    })?;

    Ok(Manifest::decode(&text)?)
}

/// Whether a listed key names a task output manifest
/// (`.../task-<id>/<name>_output`).
fn is_task_output_manifest_key(key: &str) -> bool {
    let mut segments = key.rsplit('/');
    let Some(name) = segments.next() else {
        return false;
    };
    let Some(parent) = segments.next() else {
        return false;
    };
    name.ends_with("_output") && parent.starts_with("task-")
}

/// Discover a job's output manifests, optionally narrowed to a step or
/// task, grouped by the asset root recorded in each manifest's metadata.
///
/// # Errors
/// `StorageError::MissingAssetRoot` when an output manifest carries no
/// `asset-root` metadata.
pub async fn output_manifests_by_asset_root<C: StorageClient>(
    client: &C,
    location: &S3Location,
    retry: &RetrySettings,
    farm_id: &str,
    queue_id: &str,
    job_id: &str,
    step_id: Option<&str>,
    task_id: Option<&str>,
) -> Result<HashMap<String, Vec<Manifest>>, StorageError> {
    let prefix: String =
        location.output_manifest_prefix(farm_id, queue_id, job_id, step_id, task_id)?;

    let listed: Vec<ObjectInfo> = with_retries(retry, "listing output manifests", || async {
        client.list_objects(&location.bucket, &prefix).await
    })
    .await?;

    let mut outputs: HashMap<String, Vec<Manifest>> = HashMap::new();
    for object in listed
        .iter()
        .filter(|o| is_task_output_manifest_key(&o.key))
    {
        let manifest: Manifest = download_manifest(client, location, retry, &object.key).await?;

        let head = with_retries(retry, "reading manifest metadata", || async {
            client.head_object(&location.bucket, &object.key).await
        })
        .await?;

        let asset_root: String = head
            .and_then(|metadata| metadata.user_metadata.get(ASSET_ROOT_METADATA_KEY).cloned())
            .ok_or_else(|| StorageError::MissingAssetRoot {
                key: object.key.clone(),
            })?;

        outputs.entry(asset_root).or_default().push(manifest);
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorageClient;
    use farmsync_model::{AssetManifest, ManifestPath};

    fn location() -> S3Location {
        S3Location::new("assets", "farm/ja").unwrap()
    }

    fn manifest() -> Manifest {
        Manifest::V2023_03_03(AssetManifest::new(vec![ManifestPath::new(
            "scene.ma", "abc123", 10, 1000,
        )]))
    }

    #[test]
    fn test_input_manifest_name_is_stable() {
        let a: String = input_manifest_name(None, "/projects/shot01");
        let b: String = input_manifest_name(None, "/projects/shot01");
        assert_eq!(a, b);
        assert!(a.ends_with("_input"));
        assert_ne!(a, input_manifest_name(Some("loc"), "/projects/shot01"));
    }

    #[test]
    fn test_is_task_output_manifest_key() {
        assert!(is_task_output_manifest_key(
            "farm/ja/Manifests/f/q/j/s/task-1/sess_output"
        ));
        assert!(!is_task_output_manifest_key(
            "farm/ja/Manifests/f/q/Inputs/guid/abc_input"
        ));
        assert!(!is_task_output_manifest_key("sess_output"));
    }

    #[tokio::test]
    async fn test_upload_then_download_manifest_roundtrip() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let loc: S3Location = location();
        let retry: RetrySettings = RetrySettings::default();

        let result: ManifestUploadResult = upload_input_manifest(
            &client,
            &loc,
            &retry,
            &manifest(),
            "f/q/Inputs/guid",
            "/projects/shot01",
            None,
        )
        .await
        .unwrap();

        assert!(result.partial_key.starts_with("f/q/Inputs/guid/"));
        assert_eq!(result.manifest_hash.len(), 32);

        let full_key: String = loc.add_manifest_folder_prefix(&result.partial_key);
        let downloaded: Manifest = download_manifest(&client, &loc, &retry, &full_key)
            .await
            .unwrap();
        assert_eq!(downloaded.encode().unwrap(), manifest().encode().unwrap());
    }

    #[tokio::test]
    async fn test_output_discovery_groups_by_asset_root() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let loc: S3Location = location();
        let retry: RetrySettings = RetrySettings::default();

        let encoded: Vec<u8> = manifest().encode().unwrap().into_bytes();
        let mut metadata: HashMap<String, String> = HashMap::new();
        metadata.insert(
            ASSET_ROOT_METADATA_KEY.to_string(),
            "/projects/shot01".to_string(),
        );
        client
            .put_object(
                "assets",
                "farm/ja/Manifests/f/q/j/s/task-1/sess1_output",
                encoded.clone(),
                Some(&metadata),
            )
            .await
            .unwrap();
        // A non-output key under the same prefix is ignored.
        client
            .put_object(
                "assets",
                "farm/ja/Manifests/f/q/j/s/task-1/notes.txt",
                vec![1, 2, 3],
                None,
            )
            .await
            .unwrap();

        let outputs: HashMap<String, Vec<Manifest>> = output_manifests_by_asset_root(
            &client,
            &loc,
            &retry,
            "f",
            "q",
            "j",
            Some("s"),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["/projects/shot01"].len(), 1);
    }

    #[tokio::test]
    async fn test_output_discovery_requires_asset_root_metadata() {
        let client: MemoryStorageClient = MemoryStorageClient::new();
        let loc: S3Location = location();
        let retry: RetrySettings = RetrySettings::default();

        client
            .put_object(
                "assets",
                "farm/ja/Manifests/f/q/j/task-1/sess1_output",
                manifest().encode().unwrap().into_bytes(),
                None,
            )
            .await
            .unwrap();

        let result = output_manifests_by_asset_root(
            &client, &loc, &retry, "f", "q", "j", None, None,
        )
        .await;
        assert!(matches!(
            result,
            Err(StorageError::MissingAssetRoot { .. })
        ));
    }
}
