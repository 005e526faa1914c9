//! Cross-OS path translation and mapping rules.
//!
//! A submitted job records the path format and root of the machine it came
//! from; workers on a different OS translate those paths and pick a
//! destination root either from an explicit mapping rule or from a stable
//! hash of the source root.

use std::path::Path;

use serde::{Deserialize, Serialize};

use farmsync_model::{hash_data, HashAlgorithm};

use crate::error::FileSystemError;

/// Operating system path format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathFormat {
    Windows,
    Posix,
}

impl PathFormat {
    /// Get the path format of the current host.
    pub fn host() -> Self {
        #[cfg(windows)]
        {
            PathFormat::Windows
        }
        #[cfg(not(windows))]
        {
            PathFormat::Posix
        }
    }

    /// The separator character for this format.
    pub fn separator(&self) -> char {
        match self {
            PathFormat::Windows => '\\',
            PathFormat::Posix => '/',
        }
    }
}

/// Translate a path string between OS conventions.
///
/// The path is split on the source format's separators (both separators are
/// accepted for Windows, which tolerates `/`) and rejoined with the
/// destination separator. Drive or root prefixes are carried through as the
/// first component.
pub fn map_path_between_formats(source: PathFormat, dest: PathFormat, path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let parts: Vec<&str> = match source {
        PathFormat::Windows => path.split(['\\', '/']).collect(),
        PathFormat::Posix => path.split('/').collect(),
    };

    // A leading posix separator yields an empty first part; keep it so the
    // rejoined path stays rooted.
    let joined: String = parts.join(&dest.separator().to_string());

    match (source, dest) {
        (PathFormat::Posix, PathFormat::Posix) | (PathFormat::Windows, PathFormat::Windows) => {
            joined
        }
        _ => joined,
    }
}

/// A rule mapping a source root on the submitting machine to a destination
/// root on this machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMappingRule {
    /// Path format of the submitting machine.
    pub source_path_format: PathFormat,
    /// Root path on the submitting machine.
    pub source_path: String,
    /// Root path on this machine.
    pub destination_path: String,
}

impl PathMappingRule {
    /// Stable identifier for the source root, independent of its content.
    ///
    /// Used to correlate a manifest or data set with the right destination
    /// root across machines.
    pub fn source_root_hash(&self) -> String {
        root_path_hash(&self.source_path)
    }

    /// Map an absolute source path through this rule, or `None` when the
    /// path is not under the rule's source root.
    pub fn map(&self, source: &str) -> Option<String> {
        let stripped: &str = source.strip_prefix(&self.source_path)?;
        let relative: String = map_path_between_formats(
            self.source_path_format,
            PathFormat::host(),
            stripped.trim_start_matches(['\\', '/']),
        );
        if relative.is_empty() {
            return Some(self.destination_path.clone());
        }
        Some(format!(
            "{}{}{}",
            self.destination_path,
            PathFormat::host().separator(),
            relative
        ))
    }
}

/// Stable hash of a root path's UTF-8 string.
pub fn root_path_hash(root: &str) -> String {
    hash_data(root.as_bytes(), HashAlgorithm::Xxh128)
}

/// Destination directory name for a source root, unique per root so that
/// relative paths from different manifests cannot collide.
pub fn unique_dest_dir_name(source_root: &str) -> String {
    format!("assetroot-{}", root_path_hash(source_root))
}

/// Load path mapping rules from a JSON array file.
///
/// # Errors
/// `FileSystemError::InvalidMappingFile` when the file is unreadable or not
/// a JSON array of rules.
pub fn load_path_mapping_rules(path: &Path) -> Result<Vec<PathMappingRule>, FileSystemError> {
    let contents: String =
        std::fs::read_to_string(path).map_err(|e| FileSystemError::InvalidMappingFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    serde_json::from_str(&contents).map_err(|e| FileSystemError::InvalidMappingFile {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_windows_to_posix() {
        let mapped: String = map_path_between_formats(
            PathFormat::Windows,
            PathFormat::Posix,
            r"C:\projects\shot01\scene.ma",
        );
        assert_eq!(mapped, "C:/projects/shot01/scene.ma");
    }

    #[test]
    fn test_map_posix_to_windows() {
        let mapped: String = map_path_between_formats(
            PathFormat::Posix,
            PathFormat::Windows,
            "/mnt/projects/shot01",
        );
        assert_eq!(mapped, r"\mnt\projects\shot01");
    }

    #[test]
    fn test_root_path_hash_is_stable_and_content_independent() {
        let first: String = root_path_hash("/mnt/projects/shot01");
        let second: String = root_path_hash("/mnt/projects/shot01");
        assert_eq!(first, second);
        assert_ne!(first, root_path_hash("/mnt/projects/shot02"));
    }

    #[test]
    fn test_unique_dest_dir_name_prefix() {
        let name: String = unique_dest_dir_name("/mnt/projects/shot01");
        assert!(name.starts_with("assetroot-"));
    }

    #[cfg(unix)]
    #[test]
    fn test_rule_maps_paths_under_source_root() {
        let rule: PathMappingRule = PathMappingRule {
            source_path_format: PathFormat::Posix,
            source_path: "/mnt/projects".to_string(),
            destination_path: "/sessions/job-1".to_string(),
        };

        assert_eq!(
            rule.map("/mnt/projects/shot01/scene.ma").unwrap(),
            "/sessions/job-1/shot01/scene.ma"
        );
        assert_eq!(rule.map("/mnt/projects").unwrap(), "/sessions/job-1");
        assert!(rule.map("/other/root/scene.ma").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_rule_maps_windows_source_paths() {
        let rule: PathMappingRule = PathMappingRule {
            source_path_format: PathFormat::Windows,
            source_path: r"C:\projects".to_string(),
            destination_path: "/sessions/job-1".to_string(),
        };

        assert_eq!(
            rule.map(r"C:\projects\shot01\scene.ma").unwrap(),
            "/sessions/job-1/shot01/scene.ma"
        );
    }

    #[test]
    fn test_mapping_rules_json_roundtrip() {
        let rules: Vec<PathMappingRule> = vec![PathMappingRule {
            source_path_format: PathFormat::Windows,
            source_path: r"Z:\assets".to_string(),
            destination_path: "/mnt/assets".to_string(),
        }];

        let json: String = serde_json::to_string(&rules).unwrap();
        assert!(json.contains("source_path_format"));
        assert!(json.contains("windows"));

        let parsed: Vec<PathMappingRule> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, rules);
    }

    #[test]
    fn test_load_path_mapping_rules_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("mapping.json");
        std::fs::write(
            &file,
            r#"[{"source_path_format":"posix","source_path":"/a","destination_path":"/b"}]"#,
        )
        .unwrap();

        let rules: Vec<PathMappingRule> = load_path_mapping_rules(&file).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].destination_path, "/b");
    }

    #[test]
    fn test_load_path_mapping_rules_rejects_garbage() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("mapping.json");
        std::fs::write(&file, "{not an array").unwrap();

        let result = load_path_mapping_rules(&file);
        assert!(matches!(
            result,
            Err(FileSystemError::InvalidMappingFile { .. })
        ));
    }
}
