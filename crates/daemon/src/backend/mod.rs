//! Filesystem backends.
//!
//! The checker and the browser only ever see a [`FileSystem`]: a
//! capability interface answering metadata questions about paths inside
//! one mount. Two backends ship with the daemon:
//!
//! - [`LocalFs`]: a host directory acting as the mount root (flash or SD
//!   media on a host build)
//! - [`MemoryFs`]: an in-memory tree, used as a RAM disk and as a fake in
//!   tests

pub mod local;
pub mod memory;

pub use local::LocalFs;
pub use memory::MemoryFs;

use thiserror::Error;

use crate::files::MountPath;

/// Errors reported by a backend while answering a metadata query.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The medium is not responding (card pulled, driver wedged).
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The driver gave up waiting.
    #[error("backend timed out: {0}")]
    Timeout(String),

    /// The path resolves (through a link) to a location outside the mount.
    #[error("path resolves outside the mount root: {0}")]
    OutsideRoot(String),

    /// The path does not exist.
    #[error("path does not exist: {0}")]
    NotFound(String),

    /// A directory operation was applied to something else.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            BackendError::Timeout(err.to_string())
        } else {
            BackendError::Io(err)
        }
    }
}

/// What lives at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File {
        /// Size in bytes.
        size: u64,
    },
    /// Directory.
    Directory,
    /// Anything else (device node, socket).
    Other,
}

impl EntryKind {
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File { .. })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// One entry of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry type.
    pub kind: EntryKind,
}

/// Space accounting of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// Capability interface of a mounted filesystem.
///
/// Every method is a metadata query; none of them changes the medium.
/// Implementations bound their own waiting and report a stalled medium as
/// [`BackendError::Unavailable`] or [`BackendError::Timeout`].
pub trait FileSystem: Send + Sync {
    /// Short backend kind, e.g. `directory`.
    fn kind(&self) -> &'static str;

    /// Whether the backend is still mounted.
    fn is_mounted(&self) -> bool {
        true
    }

    /// Whether the backend rejects all mutations.
    fn is_read_only(&self) -> bool;

    /// What lives at `path`, or `None` if nothing does.
    fn stat(&self, path: &MountPath) -> Result<Option<EntryKind>, BackendError>;

    /// Whether the directory at `path` has at least one entry.
    fn has_children(&self, path: &MountPath) -> Result<bool, BackendError>;

    /// Entries of the directory at `path`, in no particular order.
    fn read_dir(&self, path: &MountPath) -> Result<Vec<DirEntry>, BackendError>;

    /// Capacity and usage, if the backend can tell.
    fn usage(&self) -> Option<FsUsage> {
        None
    }
}
