//! Grouping declared paths by asset root.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use farmsync_filesystem::{is_relative_to, to_absolute};

use crate::error::SyncError;
use crate::types::{AssetRootGroup, AssetUploadGroup, StorageProfile};

/// Group declared inputs, outputs, and references by asset root.
///
/// Paths under a SHARED storage-profile location are dropped (they exist on
/// every host). Paths under a LOCAL location group together under that
/// location, keyed by the most specific match; everything else groups under
/// its filesystem root and is narrowed to the longest common ancestor at
/// the end.
///
/// # Errors
/// `SyncError::MisconfiguredInputs` listing every missing input (when
/// `require_paths_exist`) and every input declared as a file that is
/// actually a directory. With `require_paths_exist` false, missing inputs
/// demote to references with a warning.
pub fn group_asset_paths(
    input_paths: &[PathBuf],
    output_paths: &[PathBuf],
    referenced_paths: &[PathBuf],
    storage_profile: Option<&StorageProfile>,
    require_paths_exist: bool,
) -> Result<Vec<AssetRootGroup>, SyncError> {
    let (local_locations, shared_locations): (Vec<(String, String)>, Vec<String>) =
        storage_profile
            .map(|p| p.locations_by_type())
            .unwrap_or_default();

    let mut groupings: HashMap<String, AssetRootGroup> = HashMap::new();
    let mut missing_inputs: BTreeSet<String> = BTreeSet::new();
    let mut misconfigured_directories: BTreeSet<String> = BTreeSet::new();
    let mut demoted_references: Vec<PathBuf> = Vec::new();

    for path in input_paths {
        let abs_path: PathBuf = to_absolute(path)?;
        if !abs_path.exists() {
            if require_paths_exist {
                missing_inputs.insert(abs_path.display().to_string());
            } else {
                warn!(
                    path = %abs_path.display(),
                    "input path does not exist, adding to referenced paths"
                );
                demoted_references.push(abs_path);
            }
            continue;
        }
        if abs_path.is_dir() {
            misconfigured_directories.insert(abs_path.display().to_string());
            continue;
        }
        if under_any(&abs_path, &shared_locations) {
            continue;
        }
        let group: &mut AssetRootGroup =
            matched_group(&mut groupings, &abs_path, &local_locations);
        group.inputs.insert(abs_path);
    }

    if !missing_inputs.is_empty() || !misconfigured_directories.is_empty() {
        let mut details: String = String::new();
        if !missing_inputs.is_empty() {
            details.push_str("\nMissing input files:\n\t");
            details.push_str(&missing_inputs.iter().cloned().collect::<Vec<_>>().join("\n\t"));
        }
        if !misconfigured_directories.is_empty() {
            details.push_str("\nDirectories classified as files:\n\t");
            details.push_str(
                &misconfigured_directories
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n\t"),
            );
        }
        return Err(SyncError::MisconfiguredInputs { details });
    }

    for path in output_paths {
        let abs_path: PathBuf = to_absolute(path)?;
        if under_any(&abs_path, &shared_locations) {
            continue;
        }
        let group: &mut AssetRootGroup =
            matched_group(&mut groupings, &abs_path, &local_locations);
        group.outputs.insert(abs_path);
    }

    for path in referenced_paths.iter().cloned().chain(demoted_references) {
        let abs_path: PathBuf = to_absolute(&path)?;
        if under_any(&abs_path, &shared_locations) {
            continue;
        }
        let group: &mut AssetRootGroup =
            matched_group(&mut groupings, &abs_path, &local_locations);
        group.references.insert(abs_path);
    }

    // Narrow every group to the longest common ancestor of its members.
    let mut groups: Vec<AssetRootGroup> = groupings.into_values().collect();
    for group in &mut groups {
        let members: Vec<&PathBuf> = group
            .inputs
            .iter()
            .chain(group.outputs.iter())
            .chain(group.references.iter())
            .collect();
        let mut common: PathBuf = common_ancestor(&members);
        if common.is_file() {
            if let Some(parent) = common.parent() {
                common = parent.to_path_buf();
            }
        }
        group.root_path = common.display().to_string();
    }
    groups.sort_by(|a, b| a.root_path.cmp(&b.root_path));

    Ok(groups)
}

/// Group paths and compute input totals for progress reporting.
pub fn prepare_paths_for_upload(
    input_paths: &[PathBuf],
    output_paths: &[PathBuf],
    referenced_paths: &[PathBuf],
    storage_profile: Option<&StorageProfile>,
    require_paths_exist: bool,
) -> Result<AssetUploadGroup, SyncError> {
    let asset_groups: Vec<AssetRootGroup> = group_asset_paths(
        input_paths,
        output_paths,
        referenced_paths,
        storage_profile,
        require_paths_exist,
    )?;

    let mut total_input_files: u64 = 0;
    let mut total_input_bytes: u64 = 0;
    for group in &asset_groups {
        for input in &group.inputs {
            total_input_files += 1;
            total_input_bytes += input.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    Ok(AssetUploadGroup {
        asset_groups,
        total_input_files,
        total_input_bytes,
    })
}

fn under_any(path: &Path, roots: &[String]) -> bool {
    roots
        .iter()
        .any(|root| is_relative_to(path, Path::new(root)))
}

/// Pick (creating if needed) the group a path belongs to: the most specific
/// LOCAL location containing it, else its filesystem root.
fn matched_group<'a>(
    groupings: &'a mut HashMap<String, AssetRootGroup>,
    abs_path: &Path,
    local_locations: &[(String, String)],
) -> &'a mut AssetRootGroup {
    let mut matched: Option<&(String, String)> = None;
    for candidate in local_locations {
        if is_relative_to(abs_path, Path::new(&candidate.0))
            && matched.map(|m| candidate.0.len() > m.0.len()).unwrap_or(true)
        {
            matched = Some(candidate);
        }
    }

    match matched {
        Some((location_path, location_name)) => groupings
            .entry(location_path.clone())
            .or_insert_with(|| AssetRootGroup {
                file_system_location_name: Some(location_name.clone()),
                ..Default::default()
            }),
        None => {
            let top: String = abs_path
                .components()
                .next()
                .map(|c: Component| c.as_os_str().to_string_lossy().into_owned())
                .unwrap_or_default();
            groupings.entry(top).or_default()
        }
    }
}

/// Longest common path prefix of the given absolute paths.
fn common_ancestor(paths: &[&PathBuf]) -> PathBuf {
    let Some(first) = paths.first() else {
        return PathBuf::new();
    };
    let mut common: Vec<Component> = first.components().collect();

    for path in &paths[1..] {
        let components: Vec<Component> = path.components().collect();
        let shared: usize = common
            .iter()
            .zip(components.iter())
            .take_while(|(a, b)| a == b)
            .count();
        common.truncate(shared);
    }

    common.iter().collect()
}
