//! Host filesystem concerns for asset synchronization.
//!
//! This crate owns everything that touches the local filesystem shape rather
//! than its contents: expanding declared inputs to files, glob filtering,
//! path normalization and containment checks, cross-OS path mapping, and the
//! post-download permission sweep.

pub mod error;
pub mod expand;
pub mod glob;
pub mod path_mapping;
pub mod paths;
pub mod permissions;

pub use error::FileSystemError;
pub use expand::{expand_input_paths, ExpandedInputPaths};
pub use glob::GlobFilter;
pub use path_mapping::{
    load_path_mapping_rules, map_path_between_formats, root_path_hash, unique_dest_dir_name,
    PathFormat, PathMappingRule,
};
pub use paths::{ensure_paths_within_directory, is_relative_to, to_absolute};
pub use permissions::{
    set_fs_permissions, PermissionSettings, PosixPermissionSettings, WindowsPermission,
    WindowsPermissionSettings,
};
