//! Read-only FUSE filesystem over a manifest.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, Request,
};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tracing::warn;

use farmsync_model::{HashAlgorithm, Manifest};

use crate::error::VfsError;
use crate::inode::{INode, INodeKind, InodeTable};
use crate::store::FileStore;

/// Number of whole-file content blocks kept in memory.
const CONTENT_CACHE_CAPACITY: usize = 64;
/// Kernel attribute cache TTL.
const ATTR_TTL: Duration = Duration::from_secs(1);

struct OpenHandle {
    inode: u64,
    hash: String,
    size: u64,
}

/// Read-only FUSE filesystem serving a manifest's files with content
/// fetched on demand from a `FileStore`.
pub struct FarmsyncVfs {
    inodes: InodeTable,
    store: Arc<dyn FileStore>,
    hash_algorithm: HashAlgorithm,
    content_cache: Mutex<LruCache<String, Arc<Vec<u8>>>>,
    handles: RwLock<HashMap<u64, OpenHandle>>,
    next_handle: AtomicU64,
    runtime: Handle,
}

impl FarmsyncVfs {
    /// Build the filesystem from a manifest.
    ///
    /// Must be called from within a tokio runtime; content fetches run on
    /// that runtime while FUSE callbacks block on them.
    pub fn new(manifest: &Manifest, store: Arc<dyn FileStore>) -> Result<Self, VfsError> {
        let runtime: Handle = Handle::try_current()
            .map_err(|e| VfsError::MountSetup(format!("no tokio runtime: {e}")))?;
        let capacity: NonZeroUsize = NonZeroUsize::new(CONTENT_CACHE_CAPACITY)
            .ok_or_else(|| VfsError::MountSetup("zero cache capacity".to_string()))?;

        Ok(Self {
            inodes: InodeTable::build_from_manifest(manifest),
            store,
            hash_algorithm: manifest.hash_alg(),
            content_cache: Mutex::new(LruCache::new(capacity)),
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            runtime,
        })
    }

    fn to_file_attr(&self, inode: &INode) -> FileAttr {
        let kind: FileType = match inode.kind {
            INodeKind::Directory => FileType::Directory,
            INodeKind::File => FileType::RegularFile,
        };
        let mtime = UNIX_EPOCH + Duration::from_micros(inode.mtime_us.max(0) as u64);

        FileAttr {
            ino: inode.id,
            size: inode.size,
            blocks: inode.size.div_ceil(512),
            atime: mtime,
            mtime,
            ctime: mtime,
            crtime: UNIX_EPOCH,
            kind,
            perm: if kind == FileType::Directory { 0o555 } else { 0o444 },
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    /// Fetch a file's full content through the LRU cache.
    fn fetch_content(&self, hash: &str) -> Result<Arc<Vec<u8>>, VfsError> {
        if let Some(cached) = self.content_cache.lock().get(hash) {
            return Ok(cached.clone());
        }

        let store: Arc<dyn FileStore> = self.store.clone();
        let hash_owned: String = hash.to_string();
        let algorithm: HashAlgorithm = self.hash_algorithm;
        let data: Vec<u8> = self
            .runtime
            .block_on(async move { store.retrieve(&hash_owned, algorithm).await })?;

        let data: Arc<Vec<u8>> = Arc::new(data);
        self.content_cache
            .lock()
            .put(hash.to_string(), data.clone());
        Ok(data)
    }
}

impl Filesystem for FarmsyncVfs {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(parent_inode) = self.inodes.get(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        if parent_inode.kind != INodeKind::Directory {
            reply.error(libc::ENOTDIR);
            return;
        }

        let path: String = if parent_inode.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent_inode.path, name)
        };

        match self.inodes.get_by_path(&path) {
            Some(child) => reply.entry(&ATTR_TTL, &self.to_file_attr(&child), 0),
            None => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.inodes.get(ino) {
            Some(inode) => reply.attr(&ATTR_TTL, &self.to_file_attr(&inode)),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(inode) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if inode.kind != INodeKind::Directory {
            reply.error(libc::ENOTDIR);
            return;
        }

        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (inode.parent, FileType::Directory, "..".to_string()),
        ];
        if let Some(children) = self.inodes.children_of(ino) {
            for (name, child_id) in children {
                if let Some(child) = self.inodes.get(child_id) {
                    let kind: FileType = match child.kind {
                        INodeKind::Directory => FileType::Directory,
                        INodeKind::File => FileType::RegularFile,
                    };
                    entries.push((child_id, kind, name));
                }
            }
        }

        for (index, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*entry_ino, (index + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(inode) = self.inodes.get(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        if inode.kind != INodeKind::File {
            reply.error(libc::EISDIR);
            return;
        }
        if flags & libc::O_WRONLY != 0 || flags & libc::O_RDWR != 0 {
            reply.error(libc::EROFS);
            return;
        }
        let Some(hash) = inode.hash.clone() else {
            reply.error(libc::EIO);
            return;
        };

        let fh: u64 = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.handles.write().insert(
            fh,
            OpenHandle {
                inode: ino,
                hash,
                size: inode.size,
            },
        );
        reply.opened(fh, 0);
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        let (hash, file_size): (String, u64) = {
            let handles = self.handles.read();
            match handles.get(&fh) {
                Some(handle) if handle.inode == ino => (handle.hash.clone(), handle.size),
                _ => {
                    reply.error(libc::EBADF);
                    return;
                }
            }
        };

        let start: u64 = offset.max(0) as u64;
        if start >= file_size {
            reply.data(&[]);
            return;
        }

        match self.fetch_content(&hash) {
            Ok(data) => {
                let end: usize = ((start + size as u64).min(data.len() as u64)) as usize;
                reply.data(&data[start as usize..end]);
            }
            Err(error) => {
                warn!(%error, %hash, "content fetch failed during read");
                reply.error(libc::EIO);
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.write().remove(&fh);
        reply.ok();
    }
}

/// Mount the filesystem read-only at `mount_point`, blocking until unmount.
pub fn mount(vfs: FarmsyncVfs, mount_point: &Path) -> Result<(), VfsError> {
    let options: Vec<MountOption> = vec![
        MountOption::RO,
        MountOption::FSName("farmsync".to_string()),
        MountOption::DefaultPermissions,
    ];
    fuser::mount2(vfs, mount_point, &options)
        .map_err(|e| VfsError::io_error(mount_point.display().to_string(), e))
}
