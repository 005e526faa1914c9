//! Structural diff between two manifests.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::v2023_03_03::ManifestPath;
use crate::Manifest;

/// Classification of a path when comparing two manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    New,
    Modified,
    Unchanged,
    Deleted,
}

/// Compare two manifests keyed by relative path.
///
/// Every path in `reference` or `candidate` appears in the result exactly
/// once: candidate-only paths are `New`, reference-only paths are `Deleted`,
/// paths in both are `Modified` when hashes differ and `Unchanged` otherwise.
///
/// # Arguments
/// * `reference` - The baseline manifest
/// * `candidate` - The manifest with potential changes
///
/// # Returns
/// One `(status, entry)` pair per path; for `Deleted` paths the entry comes
/// from the reference manifest.
pub fn compare_manifests(
    reference: &Manifest,
    candidate: &Manifest,
) -> Vec<(FileStatus, ManifestPath)> {
    let reference_by_path: HashMap<&str, &ManifestPath> = path_map(reference);
    let candidate_by_path: HashMap<&str, &ManifestPath> = path_map(candidate);

    let mut differences: Vec<(FileStatus, ManifestPath)> = Vec::new();

    for entry in candidate_paths(candidate) {
        match reference_by_path.get(entry.path.as_str()) {
            None => differences.push((FileStatus::New, entry.clone())),
            Some(reference_entry) if reference_entry.hash != entry.hash => {
                differences.push((FileStatus::Modified, entry.clone()));
            }
            Some(_) => differences.push((FileStatus::Unchanged, entry.clone())),
        }
    }

    for entry in candidate_paths(reference) {
        if !candidate_by_path.contains_key(entry.path.as_str()) {
            differences.push((FileStatus::Deleted, entry.clone()));
        }
    }

    differences
}

fn path_map(manifest: &Manifest) -> HashMap<&str, &ManifestPath> {
    candidate_paths(manifest)
        .map(|p| (p.path.as_str(), p))
        .collect()
}

fn candidate_paths(manifest: &Manifest) -> impl Iterator<Item = &ManifestPath> {
    match manifest {
        Manifest::V2023_03_03(m) => m.paths.iter(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v2023_03_03::AssetManifest;

    fn manifest(entries: Vec<ManifestPath>) -> Manifest {
        Manifest::V2023_03_03(AssetManifest::new(entries))
    }

    #[test]
    fn test_compare_no_changes() {
        let entries = vec![ManifestPath::new("a.txt", "hash1", 100, 1000)];
        let reference: Manifest = manifest(entries.clone());
        let candidate: Manifest = manifest(entries);

        let diff = compare_manifests(&reference, &candidate);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, FileStatus::Unchanged);
    }

    #[test]
    fn test_compare_new_file() {
        let reference: Manifest = manifest(vec![ManifestPath::new("a.txt", "hash1", 100, 1000)]);
        let candidate: Manifest = manifest(vec![
            ManifestPath::new("a.txt", "hash1", 100, 1000),
            ManifestPath::new("b.txt", "hash2", 200, 2000),
        ]);

        let diff = compare_manifests(&reference, &candidate);
        let new: Vec<_> = diff
            .iter()
            .filter(|(s, _)| *s == FileStatus::New)
            .collect();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].1.path, "b.txt");
    }

    #[test]
    fn test_compare_deleted_file() {
        let reference: Manifest = manifest(vec![
            ManifestPath::new("a.txt", "hash1", 100, 1000),
            ManifestPath::new("b.txt", "hash2", 200, 2000),
        ]);
        let candidate: Manifest = manifest(vec![ManifestPath::new("a.txt", "hash1", 100, 1000)]);

        let diff = compare_manifests(&reference, &candidate);
        let deleted: Vec<_> = diff
            .iter()
            .filter(|(s, _)| *s == FileStatus::Deleted)
            .collect();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].1.path, "b.txt");
    }

    #[test]
    fn test_compare_modified_file() {
        let reference: Manifest = manifest(vec![ManifestPath::new("a.txt", "hash1", 100, 1000)]);
        let candidate: Manifest = manifest(vec![ManifestPath::new("a.txt", "hash2", 150, 2000)]);

        let diff = compare_manifests(&reference, &candidate);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, FileStatus::Modified);
        assert_eq!(diff[0].1.hash, "hash2");
    }

    // The diff must partition paths(R) ∪ paths(C): every path exactly once.
    #[test]
    fn test_compare_partitions_path_union() {
        let reference: Manifest = manifest(vec![
            ManifestPath::new("kept.txt", "same", 1, 1),
            ManifestPath::new("changed.txt", "old", 1, 1),
            ManifestPath::new("removed.txt", "gone", 1, 1),
        ]);
        let candidate: Manifest = manifest(vec![
            ManifestPath::new("kept.txt", "same", 1, 1),
            ManifestPath::new("changed.txt", "new", 1, 2),
            ManifestPath::new("added.txt", "fresh", 1, 1),
        ]);

        let diff = compare_manifests(&reference, &candidate);
        assert_eq!(diff.len(), 4);

        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for (_, entry) in &diff {
            assert!(seen.insert(entry.path.as_str()), "duplicate {}", entry.path);
        }

        let status_of = |path: &str| {
            diff.iter()
                .find(|(_, e)| e.path == path)
                .map(|(s, _)| *s)
                .unwrap()
        };
        assert_eq!(status_of("kept.txt"), FileStatus::Unchanged);
        assert_eq!(status_of("changed.txt"), FileStatus::Modified);
        assert_eq!(status_of("removed.txt"), FileStatus::Deleted);
        assert_eq!(status_of("added.txt"), FileStatus::New);
    }
}
