//! Mount a manifest backed by a local content-addressed directory.
//!
//! The directory must hold objects named `<hash>.<alg>`, the same layout
//! the store's `Data/` prefix uses. Useful for poking at a manifest without
//! network access:
//!
//! ```text
//! cargo run --example mount_vfs --features fuse -- \
//!     /tmp/mnt --manifest ./root.manifest --store-dir ./cas
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;

use farmsync_model::{HashAlgorithm, Manifest};
use farmsync_vfs::{mount, FarmsyncVfs, FileStore, VfsError};

#[derive(Parser)]
struct Args {
    /// Directory to mount at.
    mount_point: PathBuf,
    /// Manifest file describing the tree.
    #[arg(long)]
    manifest: PathBuf,
    /// Directory holding `<hash>.<alg>` content objects.
    #[arg(long)]
    store_dir: PathBuf,
}

struct DirectoryFileStore {
    root: PathBuf,
}

#[async_trait]
impl FileStore for DirectoryFileStore {
    async fn retrieve(&self, hash: &str, algorithm: HashAlgorithm) -> Result<Vec<u8>, VfsError> {
        let path: PathBuf = self.root.join(format!("{}.{}", hash, algorithm.extension()));
        tokio::fs::read(&path)
            .await
            .map_err(|e| VfsError::ContentRetrievalFailed {
                hash: hash.to_string(),
                message: e.to_string(),
            })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Args = Args::parse();

    let manifest_text: String = std::fs::read_to_string(&args.manifest)?;
    let manifest: Manifest = Manifest::decode(&manifest_text)?;
    let store: Arc<DirectoryFileStore> = Arc::new(DirectoryFileStore {
        root: args.store_dir,
    });

    let vfs: FarmsyncVfs = FarmsyncVfs::new(&manifest, store)?;
    tracing::info!(mount_point = %args.mount_point.display(), "mounting");
    tokio::task::spawn_blocking(move || mount(vfs, &args.mount_point)).await??;
    Ok(())
}
