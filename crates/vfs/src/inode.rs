//! Inode table built from a manifest.

use std::sync::Arc;

use dashmap::DashMap;

use farmsync_model::Manifest;

/// Inode id of the filesystem root.
pub const ROOT_INODE: u64 = 1;

/// Kind of node in the virtual filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum INodeKind {
    Directory,
    File,
}

/// One node of the virtual filesystem.
#[derive(Debug, Clone)]
pub struct INode {
    /// Inode id.
    pub id: u64,
    /// Parent inode id; the root points at itself.
    pub parent: u64,
    /// Path relative to the mount root, empty for the root.
    pub path: String,
    /// Final path component.
    pub name: String,
    pub kind: INodeKind,
    /// File size in bytes; 0 for directories.
    pub size: u64,
    /// Modification time in microseconds since epoch.
    pub mtime_us: i64,
    /// Content hash; `None` for directories.
    pub hash: Option<String>,
}

/// Lookup structure over a manifest's files: by inode id, by relative path,
/// and directory children listings.
pub struct InodeTable {
    by_id: DashMap<u64, Arc<INode>>,
    by_path: DashMap<String, u64>,
    children: DashMap<u64, Vec<(String, u64)>>,
}

impl InodeTable {
    /// Build the table from a manifest, synthesizing directory nodes for
    /// every path component.
    pub fn build_from_manifest(manifest: &Manifest) -> Self {
        let table: InodeTable = Self {
            by_id: DashMap::new(),
            by_path: DashMap::new(),
            children: DashMap::new(),
        };
        let mut next_id: u64 = ROOT_INODE;

        let root: Arc<INode> = Arc::new(INode {
            id: ROOT_INODE,
            parent: ROOT_INODE,
            path: String::new(),
            name: String::new(),
            kind: INodeKind::Directory,
            size: 0,
            mtime_us: 0,
            hash: None,
        });
        table.by_id.insert(ROOT_INODE, root);
        table.by_path.insert(String::new(), ROOT_INODE);
        table.children.insert(ROOT_INODE, Vec::new());

        for entry in manifest.paths() {
            let components: Vec<&str> = entry.path.split('/').collect();
            let mut parent_id: u64 = ROOT_INODE;
            let mut partial: String = String::new();

            for (index, component) in components.iter().enumerate() {
                if !partial.is_empty() {
                    partial.push('/');
                }
                partial.push_str(component);
                let is_file: bool = index == components.len() - 1;

                if let Some(existing) = table.by_path.get(&partial) {
                    parent_id = *existing;
                    continue;
                }

                next_id += 1;
                let node: Arc<INode> = Arc::new(INode {
                    id: next_id,
                    parent: parent_id,
                    path: partial.clone(),
                    name: (*component).to_string(),
                    kind: if is_file {
                        INodeKind::File
                    } else {
                        INodeKind::Directory
                    },
                    size: if is_file { entry.size } else { 0 },
                    mtime_us: if is_file { entry.mtime } else { 0 },
                    hash: if is_file { Some(entry.hash.clone()) } else { None },
                });

                table.by_id.insert(next_id, node);
                table.by_path.insert(partial.clone(), next_id);
                table
                    .children
                    .entry(parent_id)
                    .or_default()
                    .push(((*component).to_string(), next_id));
                if !is_file {
                    table.children.insert(next_id, Vec::new());
                }
                parent_id = next_id;
            }
        }

        table
    }

    /// Get a node by inode id.
    pub fn get(&self, id: u64) -> Option<Arc<INode>> {
        self.by_id.get(&id).map(|node| node.clone())
    }

    /// Get a node by relative path.
    pub fn get_by_path(&self, path: &str) -> Option<Arc<INode>> {
        let id: u64 = *self.by_path.get(path)?;
        self.get(id)
    }

    /// Children of a directory as (name, inode id) pairs.
    pub fn children_of(&self, id: u64) -> Option<Vec<(String, u64)>> {
        self.children.get(&id).map(|c| c.clone())
    }

    /// Total number of nodes, root included.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether only the root exists.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmsync_model::{AssetManifest, ManifestPath};

    fn manifest() -> Manifest {
        Manifest::V2023_03_03(AssetManifest::new(vec![
            ManifestPath::new("scene.ma", "aaa1", 10, 1000),
            ManifestPath::new("textures/wood.png", "bbb2", 20, 2000),
            ManifestPath::new("textures/stone.png", "ccc3", 30, 3000),
        ]))
    }

    #[test]
    fn test_builds_directories_from_components() {
        let table: InodeTable = InodeTable::build_from_manifest(&manifest());

        // root + scene.ma + textures + 2 files
        assert_eq!(table.len(), 5);

        let textures: Arc<INode> = table.get_by_path("textures").unwrap();
        assert_eq!(textures.kind, INodeKind::Directory);
        assert!(textures.hash.is_none());

        let wood: Arc<INode> = table.get_by_path("textures/wood.png").unwrap();
        assert_eq!(wood.kind, INodeKind::File);
        assert_eq!(wood.size, 20);
        assert_eq!(wood.hash.as_deref(), Some("bbb2"));
        assert_eq!(wood.parent, textures.id);
    }

    #[test]
    fn test_root_lists_top_level_entries() {
        let table: InodeTable = InodeTable::build_from_manifest(&manifest());
        let mut names: Vec<String> = table
            .children_of(ROOT_INODE)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["scene.ma", "textures"]);
    }

    #[test]
    fn test_directory_children() {
        let table: InodeTable = InodeTable::build_from_manifest(&manifest());
        let textures: Arc<INode> = table.get_by_path("textures").unwrap();
        let mut names: Vec<String> = table
            .children_of(textures.id)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["stone.png", "wood.png"]);
    }

    #[test]
    fn test_empty_manifest_has_only_root() {
        let empty: Manifest = Manifest::V2023_03_03(AssetManifest::new(vec![]));
        let table: InodeTable = InodeTable::build_from_manifest(&empty);
        assert!(table.is_empty());
        assert!(table.get(ROOT_INODE).is_some());
    }
}
