//! Host-directory backend.
//!
//! A directory on the host acts as the mount root. Links are resolved and
//! every resolved location must stay below the root, so a symlink cannot
//! widen what the mount exposes. That holds for dangling links too: a
//! missing path is followed link by link to where a create would land.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

use super::{BackendError, DirEntry, EntryKind, FileSystem};
use crate::files::MountPath;

/// Links followed while locating a missing path before giving up.
const MAX_LINK_DEPTH: u32 = 40;

/// A host directory mounted as a filesystem.
pub struct LocalFs {
    /// Canonical mount root.
    root: PathBuf,
    /// Read-only by configuration or by the root's permissions at mount time.
    read_only: bool,
}

impl LocalFs {
    /// Mount `root`. The directory must exist.
    pub fn open<P: AsRef<Path>>(root: P, read_only: bool) -> Result<Self, BackendError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BackendError::NotFound(root.display().to_string())
            } else {
                BackendError::from(e)
            }
        })?;
        let metadata = fs::metadata(&canonical)?;
        if !metadata.is_dir() {
            return Err(BackendError::NotADirectory(root.display().to_string()));
        }
        let read_only = read_only || metadata.permissions().readonly();

        tracing::debug!("Opened directory backend at {:?} (read_only={})", canonical, read_only);
        Ok(Self {
            root: canonical,
            read_only,
        })
    }

    /// Canonical mount root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &MountPath) -> PathBuf {
        let mut host = self.root.clone();
        for segment in path.segments() {
            host.push(segment);
        }
        host
    }

    /// Fails once the medium behind the root is gone.
    fn ensure_present(&self) -> Result<(), BackendError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "mount root {} is gone",
                self.root.display()
            )))
        }
    }

    /// Resolve `path` on the host, following links.
    ///
    /// Returns `None` if nothing exists there (including dangling links and
    /// paths running through a regular file), provided creating it would
    /// stay inside the mount.
    fn resolve(&self, path: &MountPath) -> Result<Option<PathBuf>, BackendError> {
        let host = self.host_path(path);
        match fs::canonicalize(&host) {
            Ok(canonical) => {
                if canonical.starts_with(&self.root) {
                    Ok(Some(canonical))
                } else {
                    Err(BackendError::OutsideRoot(path.to_string()))
                }
            }
            Err(e) if is_absent(&e) => {
                self.ensure_present()?;
                if landing(&host, 0)?.starts_with(&self.root) {
                    Ok(None)
                } else {
                    Err(BackendError::OutsideRoot(path.to_string()))
                }
            }
            Err(e) => {
                self.ensure_present()?;
                Err(e.into())
            }
        }
    }

    fn resolve_dir(&self, path: &MountPath) -> Result<PathBuf, BackendError> {
        let resolved = self
            .resolve(path)?
            .ok_or_else(|| BackendError::NotFound(path.to_string()))?;
        if !fs::metadata(&resolved)?.is_dir() {
            return Err(BackendError::NotADirectory(path.to_string()));
        }
        Ok(resolved)
    }
}

fn is_absent(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

/// Where `path` ends up once every link on the way is followed. Components
/// past the first missing one are taken literally.
fn landing(path: &Path, depth: u32) -> io::Result<PathBuf> {
    if depth > MAX_LINK_DEPTH {
        return Err(io::Error::other("too many levels of symbolic links"));
    }

    let mut current = PathBuf::new();
    let mut missing = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => current.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(name) => {
                let candidate = current.join(name);
                if missing {
                    current = candidate;
                    continue;
                }
                match fs::symlink_metadata(&candidate) {
                    Ok(metadata) if metadata.file_type().is_symlink() => {
                        // An absolute target replaces `current` on join.
                        let target = current.join(fs::read_link(&candidate)?);
                        current = landing(&target, depth + 1)?;
                    }
                    Ok(_) => current = candidate,
                    Err(e) if is_absent(&e) => {
                        missing = true;
                        current = candidate;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
    Ok(current)
}

fn kind_of(metadata: &fs::Metadata) -> EntryKind {
    if metadata.is_dir() {
        EntryKind::Directory
    } else if metadata.is_file() {
        EntryKind::File {
            size: metadata.len(),
        }
    } else {
        EntryKind::Other
    }
}

impl FileSystem for LocalFs {
    fn kind(&self) -> &'static str {
        "directory"
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn stat(&self, path: &MountPath) -> Result<Option<EntryKind>, BackendError> {
        let Some(resolved) = self.resolve(path)? else {
            return Ok(None);
        };
        match fs::metadata(&resolved) {
            Ok(metadata) => Ok(Some(kind_of(&metadata))),
            Err(e) if is_absent(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn has_children(&self, path: &MountPath) -> Result<bool, BackendError> {
        let resolved = self.resolve_dir(path)?;
        let mut entries = fs::read_dir(&resolved)?;
        Ok(entries.next().is_some())
    }

    fn read_dir(&self, path: &MountPath) -> Result<Vec<DirEntry>, BackendError> {
        let resolved = self.resolve_dir(path)?;

        let mut results = Vec::new();
        for entry_result in fs::read_dir(&resolved)? {
            let entry = match entry_result {
                Ok(e) => e,
                Err(_) => continue, // Skip entries we can't read
            };

            let name = entry.file_name().to_string_lossy().to_string();

            // Links are listed as what they point to, and only if the
            // target stays inside the mount.
            let target = match fs::canonicalize(entry.path()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if !target.starts_with(&self.root) {
                tracing::debug!("Hiding {:?}: resolves outside the mount", entry.path());
                continue;
            }
            let metadata = match fs::metadata(&target) {
                Ok(m) => m,
                Err(_) => continue, // Skip entries we can't stat
            };

            results.push(DirEntry {
                name,
                kind: kind_of(&metadata),
            });
        }

        Ok(results)
    }
}
