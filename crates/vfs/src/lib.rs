//! FUSE-backed lazy virtual mount for asset manifests.
//!
//! Instead of downloading a job's inputs eagerly, a manifest can be mounted
//! as a read-only filesystem whose content is fetched from the object store
//! on first read. Workloads that touch only a subset of their attachments
//! never pay for the rest.
//!
//! Two layers live here:
//!
//! - The in-process filesystem (`fuse` feature): an inode table built from
//!   a manifest, a `FileStore` seam over the backing store, and the
//!   `fuser::Filesystem` implementation.
//! - The subprocess lifecycle: `VfsProcessManager` launches the separately
//!   installed mount executable, waits for the mount point, tracks every
//!   mount of a session in a pid file, and can tear all of them down again
//!   even after a crash.

pub mod error;
pub mod inode;
pub mod process;
pub mod store;

#[cfg(feature = "fuse")]
pub mod fuse;

pub use error::VfsError;
pub use inode::{INode, INodeKind, InodeTable, ROOT_INODE};
pub use process::{
    find_vfs_executable, MountState, VfsMountSettings, VfsProcessManager,
    VFS_CACHE_FOLDER_IN_SESSION, VFS_EXECUTABLE_NAME, VFS_MANIFEST_FOLDER_IN_SESSION,
    VFS_PATH_ENV_VAR, VFS_PID_FILE_NAME,
};
pub use store::{FileStore, MemoryFileStore, StorageClientAdapter};

#[cfg(feature = "fuse")]
pub use fuse::{mount, FarmsyncVfs};
