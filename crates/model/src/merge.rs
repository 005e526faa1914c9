//! Merging manifests that target the same destination root.
//!
//! Later manifests win per path, so step outputs downloaded over job inputs
//! replace the input entries for files both describe.

use std::collections::HashMap;

use crate::error::ManifestError;
use crate::v2023_03_03::{AssetManifest, ManifestPath};
use crate::Manifest;

/// Merge manifests into one, keeping the last entry for each path.
///
/// # Arguments
/// * `manifests` - Manifests in application order (earliest first)
///
/// # Returns
/// `None` when `manifests` is empty, otherwise a single merged manifest with
/// the total size recomputed from the surviving entries.
///
/// # Errors
/// Returns `ManifestError::MergeHashAlgorithmMismatch` if the manifests do
/// not all share one hash algorithm.
pub fn merge_manifests(manifests: &[Manifest]) -> Result<Option<Manifest>, ManifestError> {
    let Some(first) = manifests.first() else {
        return Ok(None);
    };
    if manifests.len() == 1 {
        return Ok(Some(first.clone()));
    }

    let hash_alg = first.hash_alg();
    let mut merged: HashMap<String, ManifestPath> = HashMap::new();
    // Remember first-seen order so the merge is deterministic before the
    // canonical sort in encode.
    let mut order: Vec<String> = Vec::new();

    for manifest in manifests {
        if manifest.hash_alg() != hash_alg {
            return Err(ManifestError::MergeHashAlgorithmMismatch {
                expected: hash_alg,
                actual: manifest.hash_alg(),
            });
        }
        let Manifest::V2023_03_03(inner) = manifest;
        for entry in &inner.paths {
            if !merged.contains_key(&entry.path) {
                order.push(entry.path.clone());
            }
            merged.insert(entry.path.clone(), entry.clone());
        }
    }

    let paths: Vec<ManifestPath> = order
        .iter()
        .filter_map(|path| merged.remove(path))
        .collect();

    Ok(Some(Manifest::V2023_03_03(AssetManifest::new(paths))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(entries: Vec<ManifestPath>) -> Manifest {
        Manifest::V2023_03_03(AssetManifest::new(entries))
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_manifests(&[]).unwrap().is_none());
    }

    #[test]
    fn test_merge_single_is_identity() {
        let m: Manifest = manifest(vec![ManifestPath::new("a.txt", "hash1", 10, 1)]);
        let merged: Manifest = merge_manifests(std::slice::from_ref(&m)).unwrap().unwrap();
        assert_eq!(merged.encode().unwrap(), m.encode().unwrap());
    }

    #[test]
    fn test_merge_last_entry_wins() {
        let inputs: Manifest = manifest(vec![
            ManifestPath::new("shot/plate.exr", "input", 100, 1),
            ManifestPath::new("shot/ref.jpg", "refhash", 50, 1),
        ]);
        let outputs: Manifest = manifest(vec![ManifestPath::new("shot/plate.exr", "output", 120, 2)]);

        let merged: Manifest = merge_manifests(&[inputs, outputs]).unwrap().unwrap();
        let Manifest::V2023_03_03(inner) = &merged;

        assert_eq!(inner.paths.len(), 2);
        let plate: &ManifestPath = inner
            .paths
            .iter()
            .find(|p| p.path == "shot/plate.exr")
            .unwrap();
        assert_eq!(plate.hash, "output");
        assert_eq!(plate.size, 120);
        assert_eq!(inner.total_size, 170);
    }

    #[test]
    fn test_merge_recomputes_total_size() {
        let a: Manifest = manifest(vec![ManifestPath::new("a.txt", "h1", 10, 1)]);
        let b: Manifest = manifest(vec![ManifestPath::new("b.txt", "h2", 20, 1)]);
        let merged: Manifest = merge_manifests(&[a, b]).unwrap().unwrap();
        assert_eq!(merged.total_size(), 30);
        assert_eq!(merged.file_count(), 2);
    }
}
