//! Mount subprocess lifecycle.
//!
//! The worker launches the separately installed mount executable per
//! destination root, waits for the mount point to appear, and records
//! `mount_point:pid:manifest_path` in a per-session pid file. The pid file
//! survives crashes, so a recovery path can terminate every mount belonging
//! to a session even across restarts.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::VfsError;

/// Name of the externally installed mount executable.
pub const VFS_EXECUTABLE_NAME: &str = "farmsync-vfs";
/// Environment variable overriding the mount executable's install prefix.
pub const VFS_PATH_ENV_VAR: &str = "FARMSYNC_VFS_PATH";
/// Pid-file name within a session directory.
pub const VFS_PID_FILE_NAME: &str = "vfs_pids.txt";
/// Session subdirectory holding manifests handed to mounts.
pub const VFS_MANIFEST_FOLDER_IN_SESSION: &str = ".vfs_manifests";
/// Session subdirectory used as the mounts' local object cache.
pub const VFS_CACHE_FOLDER_IN_SESSION: &str = ".vfs_object_cache";

/// How long to wait for a mount point to (dis)appear.
const MOUNT_WAIT: Duration = Duration::from_secs(60);
const MOUNT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle state of one mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    NotStarted,
    /// Subprocess launched, mount point not yet confirmed.
    Starting,
    Mounted,
    Stopping,
    Stopped,
}

/// Settings for one mount subprocess.
#[derive(Debug, Clone)]
pub struct VfsMountSettings {
    /// Bucket holding the content-addressed objects.
    pub bucket: String,
    /// Root prefix within the bucket.
    pub root_prefix: String,
    /// Manifest file describing the mounted tree.
    pub manifest_path: PathBuf,
    /// Directory the tree is mounted at.
    pub mount_point: PathBuf,
    /// Local object cache directory handed to the subprocess.
    pub cache_dir: Option<PathBuf>,
}

/// One entry of the session pid file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PidFileEntry {
    mount_point: String,
    pid: u32,
    manifest_path: String,
}

impl PidFileEntry {
    fn to_line(&self) -> String {
        format!("{}:{}:{}", self.mount_point, self.pid, self.manifest_path)
    }

    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(3, ':');
        let mount_point: &str = parts.next()?;
        let pid: u32 = parts.next()?.parse().ok()?;
        let manifest_path: &str = parts.next()?;
        if mount_point.is_empty() || manifest_path.is_empty() {
            return None;
        }
        Some(Self {
            mount_point: mount_point.to_string(),
            pid,
            manifest_path: manifest_path.to_string(),
        })
    }
}

/// Locate the mount executable: first on `PATH`, then under the install
/// prefix named by `FARMSYNC_VFS_PATH`.
pub fn find_vfs_executable() -> Result<PathBuf, VfsError> {
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate: PathBuf = dir.join(VFS_EXECUTABLE_NAME);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    if let Ok(prefix) = std::env::var(VFS_PATH_ENV_VAR) {
        let candidate: PathBuf = PathBuf::from(prefix).join("bin").join(VFS_EXECUTABLE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(VfsError::ExecutableMissing)
}

/// Manages one mount subprocess from launch through shutdown.
pub struct VfsProcessManager {
    settings: VfsMountSettings,
    state: MountState,
    child: Option<Child>,
}

impl VfsProcessManager {
    /// Create a manager in the `NotStarted` state.
    pub fn new(settings: VfsMountSettings) -> Self {
        Self {
            settings,
            state: MountState::NotStarted,
            child: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MountState {
        self.state
    }

    /// The mount point this manager owns.
    pub fn mount_point(&self) -> &Path {
        &self.settings.mount_point
    }

    /// Launch the mount subprocess and wait for the mount point to appear.
    ///
    /// The subprocess's merged output is drained by a background thread
    /// into the log stream so a wedged mount can never block on a full
    /// pipe; drain errors are logged without touching the mount. On
    /// success the pid is recorded in the session pid file.
    ///
    /// # Errors
    /// `VfsError::ExecutableMissing` when no executable is installed;
    /// `VfsError::FailedToMount` when the mount point never appears within
    /// the timeout (the subprocess is killed).
    pub fn start(&mut self, session_dir: &Path) -> Result<(), VfsError> {
        let executable: PathBuf = find_vfs_executable()?;
        self.state = MountState::Starting;

        if !self.settings.mount_point.exists() {
            info!(mount_point = %self.settings.mount_point.display(), "creating mount point");
            std::fs::create_dir_all(&self.settings.mount_point).map_err(|e| {
                VfsError::io_error(self.settings.mount_point.display().to_string(), e)
            })?;
        }

        let mut command: Command = Command::new(&executable);
        command
            .arg(&self.settings.mount_point)
            .arg("--bucket")
            .arg(&self.settings.bucket)
            .arg("--root-prefix")
            .arg(&self.settings.root_prefix)
            .arg("--manifest")
            .arg(&self.settings.manifest_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cache_dir) = &self.settings.cache_dir {
            command.arg("--cache-dir").arg(cache_dir);
        }

        info!(
            executable = %executable.display(),
            mount_point = %self.settings.mount_point.display(),
            "launching mount subprocess"
        );
        let mut child: Child = command
            .spawn()
            .map_err(|e| VfsError::io_error(executable.display().to_string(), e))?;

        if let Some(stdout) = child.stdout.take() {
            spawn_output_drain(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_drain(stderr, "stderr");
        }

        let pid: u32 = child.id();
        info!(pid, "mount subprocess launched");

        if !wait_for_mount(&self.settings.mount_point, true) {
            error!(
                mount_point = %self.settings.mount_point.display(),
                "mount never appeared, shutting the subprocess down"
            );
            let _ = child.kill();
            let _ = child.wait();
            self.state = MountState::Stopped;
            return Err(VfsError::FailedToMount {
                mount_point: self.settings.mount_point.display().to_string(),
            });
        }

        record_pid_entry(
            session_dir,
            &PidFileEntry {
                mount_point: self.settings.mount_point.display().to_string(),
                pid,
                manifest_path: self.settings.manifest_path.display().to_string(),
            },
        )?;

        self.child = Some(child);
        self.state = MountState::Mounted;
        Ok(())
    }

    /// Unmount and terminate this manager's subprocess.
    pub fn stop(&mut self, session_dir: &Path) -> Result<bool, VfsError> {
        self.state = MountState::Stopping;
        let removed: bool = Self::kill_process_at_mount(session_dir, &self.settings.mount_point)?;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.state = MountState::Stopped;
        Ok(removed)
    }

    /// Whether a path is currently a mount point. `findmnt` is used because
    /// plain stat-based checks miss FUSE mounts owned by other users.
    pub fn is_mount(path: &Path) -> bool {
        Command::new("findmnt")
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Terminate the mount recorded for `mount_point` and drop its pid-file
    /// entry. Returns whether an entry was found.
    pub fn kill_process_at_mount(
        session_dir: &Path,
        mount_point: &Path,
    ) -> Result<bool, VfsError> {
        let mount_point_str: String = mount_point.display().to_string();
        let entries: Vec<PidFileEntry> = read_pid_entries(session_dir);
        let mut found: bool = false;
        let mut remaining: Vec<PidFileEntry> = Vec::new();

        for entry in entries {
            if !found && entry.mount_point == mount_point_str {
                found = true;
                shutdown_mount_entry(&entry);
            } else {
                remaining.push(entry);
            }
        }

        if found {
            write_pid_entries(session_dir, &remaining)?;
        }
        Ok(found)
    }

    /// Terminate every mount recorded for the session and remove the pid
    /// file. Used by crash recovery, so missing processes are not errors.
    pub fn kill_all_processes(session_dir: &Path) -> Result<(), VfsError> {
        let pid_file: PathBuf = session_dir.join(VFS_PID_FILE_NAME);
        if !pid_file.exists() {
            warn!(pid_file = %pid_file.display(), "no mount pid file found");
            return Ok(());
        }

        info!("terminating all recorded mount processes");
        for entry in read_pid_entries(session_dir) {
            shutdown_mount_entry(&entry);
        }
        std::fs::remove_file(&pid_file)
            .map_err(|e| VfsError::io_error(pid_file.display().to_string(), e))
    }

    /// The manifest file recorded for a mount point, if the mount is known
    /// and the file still exists.
    pub fn manifest_path_for_mount(session_dir: &Path, mount_point: &Path) -> Option<PathBuf> {
        let mount_point_str: String = mount_point.display().to_string();
        for entry in read_pid_entries(session_dir) {
            if entry.mount_point == mount_point_str {
                let manifest: PathBuf = PathBuf::from(&entry.manifest_path);
                if manifest.exists() {
                    return Some(manifest);
                }
                warn!(
                    manifest = %manifest.display(),
                    "recorded manifest for mount no longer exists"
                );
                return None;
            }
        }
        warn!(mount_point = %mount_point.display(), "no manifest recorded for mount");
        None
    }
}

/// Drain one output pipe of the mount subprocess into the log stream.
fn spawn_output_drain<R: std::io::Read + Send + 'static>(pipe: R, stream_name: &'static str) {
    std::thread::spawn(move || {
        let reader = std::io::BufReader::new(pipe);
        for line in reader.lines() {
            match line {
                Ok(line) => info!(target: "farmsync_vfs::mount", "{line}"),
                Err(err) => {
                    // Logged only; the mount itself stays up.
                    warn!(stream = stream_name, error = %err, "error draining mount output");
                    break;
                }
            }
        }
    });
}

/// Unmount one recorded entry and terminate its process if still alive.
fn shutdown_mount_entry(entry: &PidFileEntry) {
    info!(mount_point = %entry.mount_point, pid = entry.pid, "shutting down mount");

    let unmounted: bool = Command::new("fusermount3")
        .arg("-u")
        .arg(&entry.mount_point)
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !unmounted {
        warn!(mount_point = %entry.mount_point, "fusermount3 unmount failed");
    }
    wait_for_mount(Path::new(&entry.mount_point), false);

    // The process group catches any helper the mount spawned.
    #[cfg(unix)]
    {
        let pid: i64 = i64::from(entry.pid);
        if pid > 1 && pid <= i64::from(i32::MAX) {
            let pid: i32 = pid as i32;
            unsafe {
                if libc::kill(pid, 0) == 0 {
                    let _ = libc::kill(-pid, libc::SIGTERM);
                    let _ = libc::kill(pid, libc::SIGTERM);
                }
            }
        }
    }
}

/// Poll until `is_mount(path) == expected` or the wait times out.
fn wait_for_mount(path: &Path, expected: bool) -> bool {
    let deadline = std::time::Instant::now() + MOUNT_WAIT;
    loop {
        if VfsProcessManager::is_mount(path) == expected {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            warn!(
                path = %path.display(),
                expected,
                "mount state never reached expected value"
            );
            return false;
        }
        std::thread::sleep(MOUNT_POLL_INTERVAL);
    }
}

fn read_pid_entries(session_dir: &Path) -> Vec<PidFileEntry> {
    let pid_file: PathBuf = session_dir.join(VFS_PID_FILE_NAME);
    let Ok(contents) = std::fs::read_to_string(&pid_file) else {
        return Vec::new();
    };
    contents.lines().filter_map(PidFileEntry::parse).collect()
}

fn write_pid_entries(session_dir: &Path, entries: &[PidFileEntry]) -> Result<(), VfsError> {
    let pid_file: PathBuf = session_dir.join(VFS_PID_FILE_NAME);
    let contents: String = entries
        .iter()
        .map(|entry| entry.to_line())
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(&pid_file, contents)
        .map_err(|e| VfsError::io_error(pid_file.display().to_string(), e))
}

/// Record a new mount, replacing any prior entry for the same mount point.
fn record_pid_entry(session_dir: &Path, new_entry: &PidFileEntry) -> Result<(), VfsError> {
    let mut entries: Vec<PidFileEntry> = read_pid_entries(session_dir);
    entries.retain(|entry| entry.mount_point != new_entry.mount_point);
    entries.insert(0, new_entry.clone());
    write_pid_entries(session_dir, &entries)
}
