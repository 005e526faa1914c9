//! Post-download permission enforcement.
//!
//! After a job's files land on a potentially shared host, access to the
//! downloaded tree is restricted to one OS principal: a group on POSIX
//! (ownership change plus permission bits OR-ed onto the existing mode), a
//! user on Windows (DACL grant per file and directory). Failures here are
//! always surfaced to the caller; this is a security boundary, not a
//! best-effort cleanup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::FileSystemError;
use crate::paths::is_relative_to;

/// Permission settings for POSIX hosts.
///
/// `dir_mode` and `file_mode` are OR-ed with each path's existing mode after
/// group ownership is changed to `os_group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosixPermissionSettings {
    /// Target group for ownership.
    pub os_group: String,
    /// Mode bits added to directories.
    pub dir_mode: u32,
    /// Mode bits added to files.
    pub file_mode: u32,
}

/// Access level granted in a Windows DACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowsPermission {
    Read,
    Write,
    Execute,
    ReadWrite,
    FullControl,
}

/// Permission settings for Windows hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsPermissionSettings {
    /// Target user for the DACL grant.
    pub os_user: String,
    /// Access level granted on directories.
    pub dir_mode: WindowsPermission,
    /// Access level granted on files.
    pub file_mode: WindowsPermission,
}

/// Permission settings for whichever OS family the worker runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionSettings {
    Posix(PosixPermissionSettings),
    Windows(WindowsPermissionSettings),
}

/// Restrict access on downloaded files (and their parent directories up to
/// `local_root`) to the principal named in `settings`.
///
/// Every path in `file_paths` must be inside `local_root`; the sweep covers
/// each file and the set of ancestor directories between it and the root.
///
/// # Errors
/// `FileSystemError::PathOutsideRoot` for a file outside the root,
/// `FileSystemError::UnknownPrincipal` for a nonexistent group/user, and
/// `FileSystemError::PermissionChange` when the OS rejects a change. No
/// failure is downgraded.
pub fn set_fs_permissions(
    file_paths: &[PathBuf],
    local_root: &Path,
    settings: &PermissionSettings,
) -> Result<(), FileSystemError> {
    let mut dir_paths: HashSet<PathBuf> = HashSet::new();

    for file_path in file_paths {
        if !is_relative_to(file_path, local_root) {
            return Err(FileSystemError::PathOutsideRoot {
                path: file_path.display().to_string(),
                root: local_root.display().to_string(),
            });
        }

        apply(file_path, settings, false)?;

        let mut ancestor: &Path = match file_path.parent() {
            Some(p) => p,
            None => continue,
        };
        while is_relative_to(ancestor, local_root) {
            dir_paths.insert(ancestor.to_path_buf());
            ancestor = match ancestor.parent() {
                Some(p) => p,
                None => break,
            };
        }
    }

    for dir_path in &dir_paths {
        apply(dir_path, settings, true)?;
    }

    Ok(())
}

fn apply(
    path: &Path,
    settings: &PermissionSettings,
    is_dir: bool,
) -> Result<(), FileSystemError> {
    match settings {
        PermissionSettings::Posix(posix) => {
            let mode: u32 = if is_dir {
                posix.dir_mode
            } else {
                posix.file_mode
            };
            posix_change_permission(path, &posix.os_group, mode)
        }
        PermissionSettings::Windows(windows) => {
            let mode: WindowsPermission = if is_dir {
                windows.dir_mode
            } else {
                windows.file_mode
            };
            windows_change_permission(path, &windows.os_user, mode)
        }
    }
}

#[cfg(unix)]
fn posix_change_permission(
    path: &Path,
    os_group: &str,
    mode: u32,
) -> Result<(), FileSystemError> {
    use std::os::unix::fs::PermissionsExt;

    let group: nix::unistd::Group = nix::unistd::Group::from_name(os_group)
        .map_err(|e| FileSystemError::PermissionChange {
            path: path.display().to_string(),
            message: format!("group lookup failed: {e}"),
        })?
        .ok_or_else(|| FileSystemError::UnknownPrincipal {
            name: os_group.to_string(),
        })?;

    nix::unistd::chown(path, None, Some(group.gid)).map_err(|e| {
        FileSystemError::PermissionChange {
            path: path.display().to_string(),
            message: format!("chown to group '{os_group}' failed: {e}"),
        }
    })?;

    let metadata: std::fs::Metadata =
        std::fs::metadata(path).map_err(|e| FileSystemError::io_error(path.display().to_string(), e))?;
    let new_mode: u32 = metadata.permissions().mode() | mode;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(new_mode)).map_err(|e| {
        FileSystemError::PermissionChange {
            path: path.display().to_string(),
            message: format!("chmod to {new_mode:o} failed: {e}"),
        }
    })
}

#[cfg(not(unix))]
fn posix_change_permission(path: &Path, _os_group: &str, _mode: u32) -> Result<(), FileSystemError> {
    Err(FileSystemError::PermissionChange {
        path: path.display().to_string(),
        message: "POSIX permission settings applied on a non-POSIX host".to_string(),
    })
}

#[cfg(windows)]
fn windows_change_permission(
    path: &Path,
    os_user: &str,
    mode: WindowsPermission,
) -> Result<(), FileSystemError> {
    use windows::core::PCWSTR;
    use windows::Win32::Security::Authorization::{
        GetNamedSecurityInfoW, SetNamedSecurityInfoW, SE_FILE_OBJECT,
    };
    use windows::Win32::Security::{
        AddAccessAllowedAce, GetAce, InitializeAcl, LookupAccountNameW, ACL, ACL_REVISION,
        DACL_SECURITY_INFORMATION, PSID, SID_NAME_USE,
    };
    use windows::Win32::Storage::FileSystem::{
        FILE_ALL_ACCESS, FILE_GENERIC_EXECUTE, FILE_GENERIC_READ, FILE_GENERIC_WRITE,
    };

    let access_mask: u32 = match mode {
        WindowsPermission::Read => FILE_GENERIC_READ.0,
        WindowsPermission::Write => FILE_GENERIC_WRITE.0,
        WindowsPermission::Execute => FILE_GENERIC_EXECUTE.0,
        WindowsPermission::ReadWrite => FILE_GENERIC_READ.0 | FILE_GENERIC_WRITE.0,
        WindowsPermission::FullControl => FILE_ALL_ACCESS.0,
    };

    let wide_path: Vec<u16> = path
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let wide_user: Vec<u16> = os_user.encode_utf16().chain(std::iter::once(0)).collect();

    unsafe {
        let mut sid_len: u32 = 0;
        let mut domain_len: u32 = 0;
        let mut sid_use: SID_NAME_USE = SID_NAME_USE(0);
        // First call sizes the buffers.
        let _ = LookupAccountNameW(
            PCWSTR::null(),
            PCWSTR(wide_user.as_ptr()),
            PSID::default(),
            &mut sid_len,
            windows::core::PWSTR::null(),
            &mut domain_len,
            &mut sid_use,
        );
        let mut sid_buffer: Vec<u8> = vec![0u8; sid_len as usize];
        let mut domain_buffer: Vec<u16> = vec![0u16; domain_len as usize];
        let sid: PSID = PSID(sid_buffer.as_mut_ptr() as _);
        LookupAccountNameW(
            PCWSTR::null(),
            PCWSTR(wide_user.as_ptr()),
            sid,
            &mut sid_len,
            windows::core::PWSTR(domain_buffer.as_mut_ptr()),
            &mut domain_len,
            &mut sid_use,
        )
        .map_err(|_| FileSystemError::UnknownPrincipal {
            name: os_user.to_string(),
        })?;

        let mut existing_dacl: *mut ACL = std::ptr::null_mut();
        let mut security_descriptor = windows::Win32::Security::PSECURITY_DESCRIPTOR::default();
        GetNamedSecurityInfoW(
            PCWSTR(wide_path.as_ptr()),
            SE_FILE_OBJECT,
            DACL_SECURITY_INFORMATION,
            None,
            None,
            Some(&mut existing_dacl),
            None,
            &mut security_descriptor,
        )
        .ok()
        .map_err(|e| FileSystemError::PermissionChange {
            path: path.display().to_string(),
            message: format!("reading security descriptor failed: {e}"),
        })?;

        // Rebuild the DACL with the extra access-allowed entry appended.
        let mut new_dacl_buffer: Vec<u8> = vec![0u8; 4096];
        let new_dacl: *mut ACL = new_dacl_buffer.as_mut_ptr() as *mut ACL;
        InitializeAcl(new_dacl, new_dacl_buffer.len() as u32, ACL_REVISION).map_err(|e| {
            FileSystemError::PermissionChange {
                path: path.display().to_string(),
                message: format!("ACL init failed: {e}"),
            }
        })?;
        if !existing_dacl.is_null() {
            let count: u32 = (*existing_dacl).AceCount as u32;
            for index in 0..count {
                let mut ace: *mut std::ffi::c_void = std::ptr::null_mut();
                if GetAce(existing_dacl, index, &mut ace).is_ok() {
                    let header = ace as *const windows::Win32::Security::ACE_HEADER;
                    let _ = windows::Win32::Security::AddAce(
                        new_dacl,
                        ACL_REVISION,
                        u32::MAX,
                        ace,
                        (*header).AceSize as u32,
                    );
                }
            }
        }
        AddAccessAllowedAce(new_dacl, ACL_REVISION, access_mask, sid).map_err(|e| {
            FileSystemError::PermissionChange {
                path: path.display().to_string(),
                message: format!("adding ACE failed: {e}"),
            }
        })?;

        SetNamedSecurityInfoW(
            PCWSTR(wide_path.as_ptr()),
            SE_FILE_OBJECT,
            DACL_SECURITY_INFORMATION,
            PSID::default(),
            PSID::default(),
            Some(new_dacl),
            None,
        )
        .ok()
        .map_err(|e| FileSystemError::PermissionChange {
            path: path.display().to_string(),
            message: format!("writing security descriptor failed: {e}"),
        })?;
    }

    Ok(())
}

#[cfg(windows)]
use std::os::windows::ffi::OsStrExt;

#[cfg(not(windows))]
fn windows_change_permission(
    path: &Path,
    _os_user: &str,
    _mode: WindowsPermission,
) -> Result<(), FileSystemError> {
    Err(FileSystemError::PermissionChange {
        path: path.display().to_string(),
        message: "Windows permission settings applied on a non-Windows host".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_path_outside_root() {
        let settings: PermissionSettings = PermissionSettings::Posix(PosixPermissionSettings {
            os_group: "render".to_string(),
            dir_mode: 0o070,
            file_mode: 0o060,
        });
        let result = set_fs_permissions(
            &[PathBuf::from("/elsewhere/file.exr")],
            Path::new("/sessions/job-1"),
            &settings,
        );
        assert!(matches!(
            result,
            Err(FileSystemError::PathOutsideRoot { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_group_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("frame.exr");
        std::fs::write(&file, b"pixels").unwrap();

        let settings: PermissionSettings = PermissionSettings::Posix(PosixPermissionSettings {
            os_group: "no-such-group-farmsync".to_string(),
            dir_mode: 0o070,
            file_mode: 0o060,
        });
        let result = set_fs_permissions(&[file], dir.path(), &settings);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_bits_are_added_for_own_group() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("frame.exr");
        std::fs::write(&file, b"pixels").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();

        // Use the caller's own primary group so chown is permitted.
        let gid = nix::unistd::getgid();
        let group = nix::unistd::Group::from_gid(gid).unwrap().unwrap();

        let settings: PermissionSettings = PermissionSettings::Posix(PosixPermissionSettings {
            os_group: group.name,
            dir_mode: 0o070,
            file_mode: 0o060,
        });
        set_fs_permissions(&[file.clone()], dir.path(), &settings).unwrap();

        let mode: u32 = std::fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o660);
    }

    #[test]
    fn test_windows_permission_serde() {
        let json: String = serde_json::to_string(&WindowsPermission::FullControl).unwrap();
        assert_eq!(json, "\"FULL_CONTROL\"");
    }
}
