//! In-memory backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{BackendError, DirEntry, EntryKind, FileSystem, FsUsage};
use crate::files::MountPath;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Directory,
}

/// A filesystem tree held in memory.
///
/// Population helpers (`create_dir_all`, `write_file`, `remove`) act at
/// driver level and ignore the read-only switch, which only affects what
/// the backend reports to the checker.
pub struct MemoryFs {
    /// Nodes keyed by normalized path. The root is always present.
    nodes: RwLock<BTreeMap<String, Node>>,
    read_only: AtomicBool,
    available: AtomicBool,
    capacity: Option<u64>,
}

impl MemoryFs {
    /// Create an empty, writable, unbounded tree.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory);
        Self {
            nodes: RwLock::new(nodes),
            read_only: AtomicBool::new(false),
            available: AtomicBool::new(true),
            capacity: None,
        }
    }

    /// Report a capacity in [`FileSystem::usage`].
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Mark the tree read-only (or writable again).
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Simulate the medium going away; every query then fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Create a directory and any missing parents.
    pub fn create_dir_all(&self, path: &MountPath) -> Result<(), BackendError> {
        let mut nodes = self.write_nodes()?;
        Self::insert_parents(&mut nodes, path)?;
        match nodes.get(path.as_str()) {
            Some(Node::File(_)) => Err(BackendError::NotADirectory(path.to_string())),
            Some(Node::Directory) => Ok(()),
            None => {
                nodes.insert(path.to_string(), Node::Directory);
                Ok(())
            }
        }
    }

    /// Create or replace a file, creating missing parents.
    pub fn write_file(&self, path: &MountPath, content: &[u8]) -> Result<(), BackendError> {
        let mut nodes = self.write_nodes()?;
        Self::insert_parents(&mut nodes, path)?;
        if let Some(Node::Directory) = nodes.get(path.as_str()) {
            return Err(BackendError::NotADirectory(path.to_string()));
        }
        nodes.insert(path.to_string(), Node::File(content.to_vec()));
        Ok(())
    }

    /// Remove a path and everything below it.
    pub fn remove(&self, path: &MountPath) -> Result<(), BackendError> {
        if path.is_root() {
            return Err(BackendError::Unavailable("cannot remove the root".to_string()));
        }
        let mut nodes = self.write_nodes()?;
        if nodes.remove(path.as_str()).is_none() {
            return Err(BackendError::NotFound(path.to_string()));
        }
        let prefix = format!("{}/", path);
        nodes.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    fn insert_parents(
        nodes: &mut BTreeMap<String, Node>,
        path: &MountPath,
    ) -> Result<(), BackendError> {
        for ancestor in path.ancestors().iter().rev() {
            match nodes.get(ancestor.as_str()) {
                Some(Node::Directory) => {}
                Some(Node::File(_)) => {
                    return Err(BackendError::NotADirectory(ancestor.to_string()))
                }
                None => {
                    nodes.insert(ancestor.to_string(), Node::Directory);
                }
            }
        }
        Ok(())
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("memory medium detached".to_string()))
        }
    }

    fn read_nodes(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Node>>, BackendError> {
        self.nodes
            .read()
            .map_err(|_| BackendError::Unavailable("memory tree lock poisoned".to_string()))
    }

    fn write_nodes(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Node>>, BackendError> {
        self.nodes
            .write()
            .map_err(|_| BackendError::Unavailable("memory tree lock poisoned".to_string()))
    }

    /// Prefix shared by all direct and indirect children of `path`.
    fn child_prefix(path: &MountPath) -> String {
        if path.is_root() {
            "/".to_string()
        } else {
            format!("{}/", path)
        }
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_of(node: &Node) -> EntryKind {
    match node {
        Node::File(content) => EntryKind::File {
            size: content.len() as u64,
        },
        Node::Directory => EntryKind::Directory,
    }
}

impl FileSystem for MemoryFs {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    fn stat(&self, path: &MountPath) -> Result<Option<EntryKind>, BackendError> {
        self.check_available()?;
        let nodes = self.read_nodes()?;
        Ok(nodes.get(path.as_str()).map(kind_of))
    }

    fn has_children(&self, path: &MountPath) -> Result<bool, BackendError> {
        self.check_available()?;
        let nodes = self.read_nodes()?;
        let prefix = Self::child_prefix(path);
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .any(|(key, _)| key.len() > prefix.len()))
    }

    fn read_dir(&self, path: &MountPath) -> Result<Vec<DirEntry>, BackendError> {
        self.check_available()?;
        let nodes = self.read_nodes()?;
        match nodes.get(path.as_str()) {
            None => return Err(BackendError::NotFound(path.to_string())),
            Some(Node::File(_)) => return Err(BackendError::NotADirectory(path.to_string())),
            Some(Node::Directory) => {}
        }

        let prefix = Self::child_prefix(path);
        let entries = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, node)| {
                let rest = &key[prefix.len()..];
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(DirEntry {
                        name: rest.to_string(),
                        kind: kind_of(node),
                    })
                }
            })
            .collect();
        Ok(entries)
    }

    fn usage(&self) -> Option<FsUsage> {
        let total_bytes = self.capacity?;
        let nodes = self.nodes.read().ok()?;
        let used_bytes = nodes
            .values()
            .map(|node| match node {
                Node::File(content) => content.len() as u64,
                Node::Directory => 0,
            })
            .sum();
        Some(FsUsage {
            total_bytes,
            used_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(raw: &str) -> MountPath {
        MountPath::parse(raw, 255).unwrap()
    }

    #[test]
    fn test_root_exists() {
        let fs = MemoryFs::new();
        assert_eq!(fs.stat(&MountPath::root()).unwrap(), Some(EntryKind::Directory));
        assert!(!fs.has_children(&MountPath::root()).unwrap());
    }

    #[test]
    fn test_write_file_creates_parents() {
        let fs = MemoryFs::new();
        fs.write_file(&path("/data/logs/a.txt"), b"hello").unwrap();

        assert_eq!(fs.stat(&path("/data")).unwrap(), Some(EntryKind::Directory));
        assert_eq!(
            fs.stat(&path("/data/logs/a.txt")).unwrap(),
            Some(EntryKind::File { size: 5 })
        );
        assert!(fs.has_children(&path("/data")).unwrap());
        assert_eq!(fs.stat(&path("/missing")).unwrap(), None);
    }

    #[test]
    fn test_has_children_ignores_sibling_prefixes() {
        let fs = MemoryFs::new();
        fs.create_dir_all(&path("/data")).unwrap();
        fs.write_file(&path("/database/x"), b"x").unwrap();

        assert!(!fs.has_children(&path("/data")).unwrap());
    }

    #[test]
    fn test_read_dir_lists_direct_children_only() {
        let fs = MemoryFs::new();
        fs.write_file(&path("/data/a.txt"), b"a").unwrap();
        fs.write_file(&path("/data/sub/b.txt"), b"b").unwrap();

        let mut names: Vec<String> = fs
            .read_dir(&path("/data"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);

        let root: Vec<String> = fs
            .read_dir(&MountPath::root())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(root, vec!["data"]);
    }

    #[test]
    fn test_read_dir_on_file() {
        let fs = MemoryFs::new();
        fs.write_file(&path("/a.txt"), b"a").unwrap();
        assert!(matches!(
            fs.read_dir(&path("/a.txt")),
            Err(BackendError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_file_parent_is_rejected() {
        let fs = MemoryFs::new();
        fs.write_file(&path("/a.txt"), b"a").unwrap();
        assert!(matches!(
            fs.write_file(&path("/a.txt/b"), b"b"),
            Err(BackendError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_remove_subtree() {
        let fs = MemoryFs::new();
        fs.write_file(&path("/data/a.txt"), b"a").unwrap();
        fs.write_file(&path("/data/sub/b.txt"), b"b").unwrap();
        fs.write_file(&path("/database"), b"keep").unwrap();

        fs.remove(&path("/data")).unwrap();
        assert_eq!(fs.stat(&path("/data/sub/b.txt")).unwrap(), None);
        assert!(fs.stat(&path("/database")).unwrap().is_some());
    }

    #[test]
    fn test_unavailable_medium() {
        let fs = MemoryFs::new();
        fs.set_available(false);
        assert!(matches!(
            fs.stat(&MountPath::root()),
            Err(BackendError::Unavailable(_))
        ));
        fs.set_available(true);
        assert!(fs.stat(&MountPath::root()).is_ok());
    }

    #[test]
    fn test_usage_with_capacity() {
        let fs = MemoryFs::new().with_capacity(1024);
        fs.write_file(&path("/a"), &[0u8; 100]).unwrap();
        fs.write_file(&path("/d/b"), &[0u8; 24]).unwrap();

        let usage = fs.usage().unwrap();
        assert_eq!(usage.total_bytes, 1024);
        assert_eq!(usage.used_bytes, 124);
        assert!(MemoryFs::new().usage().is_none());
    }
}
