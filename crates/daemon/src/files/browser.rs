//! Directory browsing through the flag checker.
//!
//! A listing is an ordinary `LIST` request: the checker approves it first,
//! then the browser reads the directory from the backend and drops whatever
//! the mount's rules hide.

use protocol::messages::{FileEntry, FileEntryType};
use protocol::{DenyReason, FileFlags};
use thiserror::Error;

use super::checker::{Decision, Denial, FlagChecker};
use super::path::MountPath;
use super::registry::Mount;
use crate::backend::{BackendError, DirEntry, EntryKind};

/// Errors that can occur while listing a directory.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The checker refused the listing.
    #[error("listing denied ({}): {}", .0.reason, .0.message)]
    Denied(Denial),

    /// The backend failed after the listing was approved.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

impl BrowserError {
    /// Denial reason to report for this error.
    pub fn reason(&self) -> DenyReason {
        match self {
            BrowserError::Denied(denial) => denial.reason,
            BrowserError::Backend(BackendError::OutsideRoot(_)) => DenyReason::PathEscape,
            BrowserError::Backend(BackendError::NotFound(_)) => DenyReason::NotFound,
            BrowserError::Backend(BackendError::NotADirectory(_)) => DenyReason::WrongType,
            BrowserError::Backend(_) => DenyReason::BackendUnavailable,
        }
    }
}

/// One listed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Full path inside the mount.
    pub path: MountPath,
    /// Entry type.
    pub kind: EntryKind,
}

impl DirectoryEntry {
    /// Convert to protocol FileEntry.
    pub fn to_protocol(&self) -> FileEntry {
        let (entry_type, size) = match self.kind {
            EntryKind::File { size } => (FileEntryType::File, size),
            EntryKind::Directory => (FileEntryType::Directory, 0),
            EntryKind::Other => (FileEntryType::Other, 0),
        };
        FileEntry {
            name: self.name.clone(),
            entry_type,
            size,
        }
    }
}

/// Lists directories of registered mounts.
#[derive(Debug, Clone, Default)]
pub struct DirectoryBrowser {
    checker: FlagChecker,
    /// Whether dot files are listed.
    include_hidden: bool,
}

impl DirectoryBrowser {
    pub fn new(checker: FlagChecker, include_hidden: bool) -> Self {
        Self {
            checker,
            include_hidden,
        }
    }

    /// List the directory at `path` on `mount`.
    ///
    /// Entries hidden by the mount's rules are skipped, as are dot files
    /// unless `include_hidden` is set. Directories come first, then files,
    /// each sorted case-insensitively.
    pub fn list(
        &self,
        mount: &Mount,
        path: &str,
    ) -> Result<(MountPath, Vec<DirectoryEntry>), BrowserError> {
        let dir = match self
            .checker
            .check_with_rules(mount.fs(), mount.rules(), path, FileFlags::LIST)
        {
            Decision::Approved { path, .. } => path,
            Decision::Denied(denial) => return Err(BrowserError::Denied(denial)),
        };

        let mut results = Vec::new();
        for DirEntry { name, kind } in mount.fs().read_dir(&dir)? {
            if !self.include_hidden && name.starts_with('.') {
                continue;
            }
            let Ok(path) = dir.join(&name) else {
                continue; // Names a backend should never produce
            };
            if mount.rules().evaluate(&path).hidden {
                continue;
            }
            results.push(DirectoryEntry { name, path, kind });
        }

        results.sort_by(|a, b| match (a.kind.is_dir(), b.kind.is_dir()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok((dir, results))
    }
}
