//! Operation flags and their semantics.
//!
//! A file operation request carries a [`FileFlags`] bitmask. [`classify`] is
//! the single place that decides what a combination of bits means and which
//! combinations are contradictory. It performs no I/O and is total over the
//! whole `u32` space: every value maps either to an [`Intent`] or to at least
//! one [`FlagConflict`].

use std::fmt;

use bitflags::bitflags;

use crate::error::ProtocolError;

bitflags! {
    /// Capabilities requested for one file operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileFlags: u32 {
        /// Open an existing file for reading.
        const READ = 1 << 0;
        /// Open a file for writing.
        const WRITE = 1 << 1;
        /// Create the target if it is missing.
        const CREATE = 1 << 2;
        /// Discard existing content. Requires `WRITE`.
        const TRUNCATE = 1 << 3;
        /// Write at the end of an existing file. Implies `WRITE`.
        const APPEND = 1 << 4;
        /// Remove the target.
        const DELETE = 1 << 5;
        /// Enumerate a directory.
        const LIST = 1 << 6;
        /// Apply `DELETE` or `LIST` to a whole directory tree.
        const RECURSE = 1 << 7;
        /// Refuse to write over an existing file.
        const OVERWRITE_PROTECT = 1 << 8;
        /// Effect bit: missing parent directories must be created first.
        /// Never valid in a request.
        const CREATE_PARENTS = 1 << 16;
    }
}

impl FileFlags {
    /// Bits a caller may put in a request.
    pub const REQUESTABLE: FileFlags = FileFlags::READ
        .union(FileFlags::WRITE)
        .union(FileFlags::CREATE)
        .union(FileFlags::TRUNCATE)
        .union(FileFlags::APPEND)
        .union(FileFlags::DELETE)
        .union(FileFlags::LIST)
        .union(FileFlags::RECURSE)
        .union(FileFlags::OVERWRITE_PROTECT);

    /// Bits that modify content or the namespace.
    pub const MUTATING: FileFlags = FileFlags::WRITE
        .union(FileFlags::CREATE)
        .union(FileFlags::TRUNCATE)
        .union(FileFlags::APPEND)
        .union(FileFlags::DELETE);

    /// Bits that write file content.
    pub const CONTENT_WRITE: FileFlags = FileFlags::WRITE
        .union(FileFlags::TRUNCATE)
        .union(FileFlags::APPEND);
}

/// A logically inconsistent flag combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagConflict {
    /// No bits set.
    Empty,
    /// Bits outside the requestable set (value holds the offending bits).
    UnknownBits(u32),
    /// `CREATE` together with `DELETE`.
    CreateWithDelete,
    /// `DELETE` together with any read, write or list bit.
    DeleteWithAccess,
    /// `TRUNCATE` without `WRITE`.
    TruncateWithoutWrite,
    /// `TRUNCATE` together with `APPEND`.
    TruncateWithAppend,
    /// `OVERWRITE_PROTECT` together with `TRUNCATE` or `APPEND`.
    ProtectWithModify,
    /// `OVERWRITE_PROTECT` without `WRITE` or `CREATE`.
    ProtectWithoutWrite,
    /// `RECURSE` without `DELETE` or `LIST`.
    RecurseWithoutTarget,
    /// `LIST` together with a write or create bit.
    ListWithMutation,
}

impl fmt::Display for FlagConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagConflict::Empty => write!(f, "no operation requested"),
            FlagConflict::UnknownBits(bits) => write!(f, "unknown flag bits {:#x}", bits),
            FlagConflict::CreateWithDelete => write!(f, "CREATE cannot be combined with DELETE"),
            FlagConflict::DeleteWithAccess => {
                write!(f, "DELETE cannot be combined with READ, WRITE, TRUNCATE, APPEND or LIST")
            }
            FlagConflict::TruncateWithoutWrite => write!(f, "TRUNCATE requires WRITE"),
            FlagConflict::TruncateWithAppend => write!(f, "TRUNCATE cannot be combined with APPEND"),
            FlagConflict::ProtectWithModify => {
                write!(f, "OVERWRITE_PROTECT cannot be combined with TRUNCATE or APPEND")
            }
            FlagConflict::ProtectWithoutWrite => {
                write!(f, "OVERWRITE_PROTECT requires WRITE or CREATE")
            }
            FlagConflict::RecurseWithoutTarget => write!(f, "RECURSE requires DELETE or LIST"),
            FlagConflict::ListWithMutation => {
                write!(f, "LIST cannot be combined with WRITE, CREATE, TRUNCATE or APPEND")
            }
        }
    }
}

/// What a valid flag combination asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Intent {
    pub read: bool,
    pub list: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
    pub delete: bool,
    pub recursive: bool,
    pub overwrite_protect: bool,
}

impl Intent {
    fn from_flags(flags: FileFlags) -> Self {
        Self {
            read: flags.contains(FileFlags::READ),
            list: flags.contains(FileFlags::LIST),
            write: flags.contains(FileFlags::WRITE),
            create: flags.contains(FileFlags::CREATE),
            truncate: flags.contains(FileFlags::TRUNCATE),
            append: flags.contains(FileFlags::APPEND),
            delete: flags.contains(FileFlags::DELETE),
            recursive: flags.contains(FileFlags::RECURSE),
            overwrite_protect: flags.contains(FileFlags::OVERWRITE_PROTECT),
        }
    }

    /// Whether the operation changes content or the namespace.
    pub fn mutates(&self) -> bool {
        self.writes_content() || self.create || self.delete
    }

    /// Whether the operation writes file content.
    pub fn writes_content(&self) -> bool {
        self.write || self.truncate || self.append
    }

    /// Whether the operation only observes.
    pub fn observes(&self) -> bool {
        (self.read || self.list) && !self.mutates()
    }
}

/// Result of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Requested flags after normalization (`APPEND` adds `WRITE`).
    pub flags: FileFlags,
    /// What the request asks for.
    pub intent: Intent,
    /// Every conflict found, in table order.
    pub conflicts: Vec<FlagConflict>,
}

impl Classification {
    /// Whether the combination is legal.
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// First conflict found, if any.
    pub fn first_conflict(&self) -> Option<FlagConflict> {
        self.conflicts.first().copied()
    }
}

/// Classify a requested bitmask.
pub fn classify(requested: FileFlags) -> Classification {
    let mut conflicts = Vec::new();

    let unknown = requested.bits() & !FileFlags::REQUESTABLE.bits();
    if requested.is_empty() {
        conflicts.push(FlagConflict::Empty);
    }
    if unknown != 0 {
        conflicts.push(FlagConflict::UnknownBits(unknown));
    }

    let mut flags = requested & FileFlags::REQUESTABLE;

    if flags.contains(FileFlags::CREATE | FileFlags::DELETE) {
        conflicts.push(FlagConflict::CreateWithDelete);
    }
    if flags.contains(FileFlags::DELETE)
        && flags.intersects(FileFlags::READ | FileFlags::CONTENT_WRITE | FileFlags::LIST)
    {
        conflicts.push(FlagConflict::DeleteWithAccess);
    }
    if flags.contains(FileFlags::TRUNCATE) && !flags.contains(FileFlags::WRITE) {
        conflicts.push(FlagConflict::TruncateWithoutWrite);
    }
    if flags.contains(FileFlags::TRUNCATE | FileFlags::APPEND) {
        conflicts.push(FlagConflict::TruncateWithAppend);
    }
    if flags.contains(FileFlags::OVERWRITE_PROTECT) {
        if flags.intersects(FileFlags::TRUNCATE | FileFlags::APPEND) {
            conflicts.push(FlagConflict::ProtectWithModify);
        }
        if !flags.intersects(FileFlags::WRITE | FileFlags::CREATE) {
            conflicts.push(FlagConflict::ProtectWithoutWrite);
        }
    }
    if flags.contains(FileFlags::RECURSE) && !flags.intersects(FileFlags::DELETE | FileFlags::LIST)
    {
        conflicts.push(FlagConflict::RecurseWithoutTarget);
    }
    if flags.contains(FileFlags::LIST)
        && flags.intersects(FileFlags::CONTENT_WRITE | FileFlags::CREATE)
    {
        conflicts.push(FlagConflict::ListWithMutation);
    }

    if flags.contains(FileFlags::APPEND) {
        flags.insert(FileFlags::WRITE);
    }

    Classification {
        flags,
        intent: Intent::from_flags(flags),
        conflicts,
    }
}

/// Parse a list such as `read,write` or `CREATE | TRUNCATE`.
///
/// Names are case-insensitive and `-` may stand in for `_`.
pub fn parse_flag_list(input: &str) -> Result<FileFlags, ProtocolError> {
    let mut flags = FileFlags::empty();
    for name in input.split([',', '|']).map(str::trim).filter(|s| !s.is_empty()) {
        let canonical = name.to_ascii_uppercase().replace('-', "_");
        let flag = FileFlags::from_name(&canonical)
            .ok_or_else(|| ProtocolError::InvalidFlags(name.to_string()))?;
        flags.insert(flag);
    }
    Ok(flags)
}

/// Human-readable form such as `READ|WRITE`, with unknown bits in hex.
pub fn describe_flags(flags: FileFlags) -> String {
    let mut parts: Vec<String> = flags.iter_names().map(|(name, _)| name.to_string()).collect();
    let unknown = flags.bits() & !FileFlags::all().bits();
    if unknown != 0 {
        parts.push(format!("{:#x}", unknown));
    }
    if parts.is_empty() {
        "(none)".to_string()
    } else {
        parts.join("|")
    }
}
