//! Flag checker: the gate in front of every file operation.
//!
//! [`FlagChecker::check_file_flags`] takes a borrowed backend, a raw path and
//! a requested [`FileFlags`] mask and answers with a [`Decision`]. It only
//! asks the backend metadata questions and never changes the medium, so it
//! is safe to call speculatively. The decision is advisory: the caller must
//! still handle the actual operation failing if the medium changed in the
//! meantime.
//!
//! Evaluation order, each step short-circuiting on denial:
//!
//! 1. flag combination ([`protocol::classify`]), before any I/O
//! 2. path normalization and containment
//! 3. mount access rules
//! 4. read-only media
//! 5. filesystem state (existence, type, emptiness) per intent

use protocol::{classify, describe_flags, DenyReason, FileFlags, Intent};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::path::{MountPath, PathError};
use super::rules::AccessRules;
use crate::backend::{BackendError, EntryKind, FileSystem};

/// Default upper bound on normalized path length.
pub const DEFAULT_MAX_PATH_LEN: usize = 255;

/// What CREATE means for a path that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CreateMode {
    /// Deny with `ALREADY_EXISTS`.
    #[default]
    Strict,
    /// Approve and drop CREATE from the effective flags.
    Permissive,
}

impl std::str::FromStr for CreateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(CreateMode::Strict),
            "permissive" => Ok(CreateMode::Permissive),
            other => Err(format!("unknown create mode: {}", other)),
        }
    }
}

/// Tunables of the checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPolicy {
    pub create_mode: CreateMode,
    /// Approve CREATE below missing directories, adding `CREATE_PARENTS`.
    pub create_parents: bool,
    pub max_path_len: usize,
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self {
            create_mode: CreateMode::Strict,
            create_parents: true,
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

/// A refused operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub reason: DenyReason,
    pub message: String,
}

impl Denial {
    fn new(reason: DenyReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed with `effective` flags on `path`.
    Approved {
        path: MountPath,
        effective: FileFlags,
    },
    /// The operation must not proceed.
    Denied(Denial),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved { .. })
    }

    /// Effective flags of an approval.
    pub fn effective_flags(&self) -> Option<FileFlags> {
        match self {
            Decision::Approved { effective, .. } => Some(*effective),
            Decision::Denied(_) => None,
        }
    }

    /// Reason of a denial.
    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Approved { .. } => None,
            Decision::Denied(denial) => Some(denial.reason),
        }
    }
}

/// The authorization gate.
#[derive(Debug, Clone, Default)]
pub struct FlagChecker {
    policy: CheckPolicy,
}

impl FlagChecker {
    pub fn new(policy: CheckPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CheckPolicy {
        &self.policy
    }

    /// Decide whether `flags` may be applied to `path` on `fs`, with no
    /// access rules in force.
    ///
    /// # Panics
    ///
    /// Panics if `fs` reports that it was never mounted. Handing such a
    /// handle to the checker is a caller bug, not a request error. Media
    /// that fail after mounting (a pulled card) answer their queries with
    /// an error instead and are denied with `BACKEND_UNAVAILABLE`.
    pub fn check_file_flags(&self, fs: &dyn FileSystem, path: &str, flags: FileFlags) -> Decision {
        self.check_with_rules(fs, &AccessRules::allow_all(), path, flags)
    }

    /// Same as [`check_file_flags`](Self::check_file_flags), honoring the
    /// mount's access rules.
    pub fn check_with_rules(
        &self,
        fs: &dyn FileSystem,
        rules: &AccessRules,
        path: &str,
        flags: FileFlags,
    ) -> Decision {
        assert!(
            fs.is_mounted(),
            "flag check against an unmounted {} backend",
            fs.kind()
        );

        match self.evaluate(fs, rules, path, flags) {
            Ok((path, effective)) => {
                trace!(
                    "Approved {} on {} as {}",
                    describe_flags(flags),
                    path,
                    describe_flags(effective)
                );
                Decision::Approved { path, effective }
            }
            Err(denial) => {
                debug!(
                    "Denied {} on {:?}: {} ({})",
                    describe_flags(flags),
                    path,
                    denial.reason,
                    denial.message
                );
                Decision::Denied(denial)
            }
        }
    }

    fn evaluate(
        &self,
        fs: &dyn FileSystem,
        rules: &AccessRules,
        raw_path: &str,
        flags: FileFlags,
    ) -> Result<(MountPath, FileFlags), Denial> {
        let classification = classify(flags);
        if let Some(conflict) = classification.first_conflict() {
            return Err(Denial::new(DenyReason::FlagConflict, conflict.to_string()));
        }
        let intent = classification.intent;
        let mut effective = classification.flags;

        let path = MountPath::parse(raw_path, self.policy.max_path_len).map_err(path_denial)?;

        check_rules(rules, &path, &intent)?;

        if intent.mutates() && fs.is_read_only() {
            return Err(Denial::new(
                DenyReason::MediaReadonly,
                format!("{} backend is mounted read-only", fs.kind()),
            ));
        }

        let kind = fs.stat(&path).map_err(backend_denial)?;

        if intent.delete {
            self.check_delete(fs, rules, &path, kind, &intent, &mut effective)?;
        } else if intent.list {
            match kind {
                None => return Err(not_found(&path)),
                Some(EntryKind::Directory) => {}
                Some(_) => {
                    return Err(Denial::new(
                        DenyReason::WrongType,
                        format!("not a directory: {}", path),
                    ))
                }
            }
        } else {
            match kind {
                Some(EntryKind::File { .. }) => {
                    self.check_existing_file(&path, &intent, &mut effective)?
                }
                Some(_) => self.check_existing_dir(&path, &intent, &mut effective)?,
                None => self.check_missing(fs, &path, &intent, &mut effective)?,
            }
        }

        effective.remove(FileFlags::OVERWRITE_PROTECT);
        Ok((path, effective))
    }

    fn check_delete(
        &self,
        fs: &dyn FileSystem,
        rules: &AccessRules,
        path: &MountPath,
        kind: Option<EntryKind>,
        intent: &Intent,
        effective: &mut FileFlags,
    ) -> Result<(), Denial> {
        match kind {
            None => Err(not_found(path)),
            Some(EntryKind::Directory) => {
                let has_children = fs.has_children(path).map_err(backend_denial)?;
                if !has_children {
                    effective.remove(FileFlags::RECURSE);
                    return Ok(());
                }
                if !intent.recursive {
                    return Err(Denial::new(
                        DenyReason::NotEmpty,
                        format!("directory is not empty: {}", path),
                    ));
                }
                if rules.restricts_below(path) {
                    return Err(Denial::new(
                        DenyReason::AccessDenied,
                        format!("a protected path lies below {}", path),
                    ));
                }
                Ok(())
            }
            Some(_) => {
                effective.remove(FileFlags::RECURSE);
                Ok(())
            }
        }
    }

    fn check_existing_file(
        &self,
        path: &MountPath,
        intent: &Intent,
        effective: &mut FileFlags,
    ) -> Result<(), Denial> {
        if intent.overwrite_protect {
            return Err(Denial::new(
                DenyReason::AlreadyExists,
                format!("refusing to overwrite {}", path),
            ));
        }
        if intent.create {
            self.existing_create(path, effective)?;
        }
        Ok(())
    }

    fn check_existing_dir(
        &self,
        path: &MountPath,
        intent: &Intent,
        effective: &mut FileFlags,
    ) -> Result<(), Denial> {
        if intent.read || intent.writes_content() {
            return Err(Denial::new(
                DenyReason::WrongType,
                format!("not a file: {}", path),
            ));
        }
        // Only CREATE (possibly with OVERWRITE_PROTECT) is left.
        if intent.overwrite_protect {
            return Err(Denial::new(
                DenyReason::AlreadyExists,
                format!("already exists: {}", path),
            ));
        }
        self.existing_create(path, effective)
    }

    fn existing_create(&self, path: &MountPath, effective: &mut FileFlags) -> Result<(), Denial> {
        match self.policy.create_mode {
            CreateMode::Strict => Err(Denial::new(
                DenyReason::AlreadyExists,
                format!("already exists: {}", path),
            )),
            CreateMode::Permissive => {
                effective.remove(FileFlags::CREATE);
                Ok(())
            }
        }
    }

    fn check_missing(
        &self,
        fs: &dyn FileSystem,
        path: &MountPath,
        intent: &Intent,
        effective: &mut FileFlags,
    ) -> Result<(), Denial> {
        if !intent.create {
            return Err(not_found(path));
        }

        let mut missing_parent = false;
        for ancestor in path.ancestors() {
            match fs.stat(&ancestor).map_err(backend_denial)? {
                Some(EntryKind::Directory) => break,
                Some(_) => {
                    return Err(Denial::new(
                        DenyReason::WrongType,
                        format!("parent is not a directory: {}", ancestor),
                    ))
                }
                None => missing_parent = true,
            }
        }

        if missing_parent {
            if !self.policy.create_parents {
                return Err(Denial::new(
                    DenyReason::NotFound,
                    format!("parent directory missing: {}", path),
                ));
            }
            effective.insert(FileFlags::CREATE_PARENTS);
        }

        // Nothing to truncate yet.
        effective.remove(FileFlags::TRUNCATE);
        Ok(())
    }
}

fn check_rules(rules: &AccessRules, path: &MountPath, intent: &Intent) -> Result<(), Denial> {
    let verdict = rules.evaluate(path);
    if verdict.hidden {
        return Err(not_found(path));
    }

    let allowed = (!(intent.read || intent.list) || verdict.level.can_read())
        && (!(intent.writes_content() || intent.create) || verdict.level.can_write())
        && (!intent.delete || verdict.level.can_delete());
    if !allowed {
        return Err(Denial::new(
            DenyReason::AccessDenied,
            format!("{:?} access below {}", verdict.level, path),
        ));
    }

    if intent.delete && path.is_root() {
        return Err(Denial::new(
            DenyReason::AccessDenied,
            "the mount root cannot be deleted",
        ));
    }
    Ok(())
}

fn not_found(path: &MountPath) -> Denial {
    Denial::new(DenyReason::NotFound, format!("no such path: {}", path))
}

fn path_denial(err: PathError) -> Denial {
    let reason = match err {
        PathError::Escape(_) => DenyReason::PathEscape,
        _ => DenyReason::InvalidPath,
    };
    Denial::new(reason, err.to_string())
}

fn backend_denial(err: BackendError) -> Denial {
    let reason = match err {
        BackendError::OutsideRoot(_) => DenyReason::PathEscape,
        BackendError::NotFound(_) => DenyReason::NotFound,
        BackendError::NotADirectory(_) => DenyReason::WrongType,
        BackendError::Unavailable(_) | BackendError::Timeout(_) | BackendError::Io(_) => {
            DenyReason::BackendUnavailable
        }
    };
    Denial::new(reason, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::backend::{DirEntry, MemoryFs};
    use crate::files::rules::{AccessLevel, AccessRule};

    fn path(raw: &str) -> MountPath {
        MountPath::parse(raw, 255).unwrap()
    }

    /// `/data/log.txt` on a writable tree.
    fn data_fs() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.write_file(&path("/data/log.txt"), b"boot ok\n").unwrap();
        fs
    }

    fn strict() -> FlagChecker {
        FlagChecker::default()
    }

    fn permissive() -> FlagChecker {
        FlagChecker::new(CheckPolicy {
            create_mode: CreateMode::Permissive,
            ..CheckPolicy::default()
        })
    }

    /// Counts metadata queries reaching the backend.
    struct CountingFs {
        inner: MemoryFs,
        queries: AtomicUsize,
    }

    impl CountingFs {
        fn new(inner: MemoryFs) -> Self {
            Self {
                inner,
                queries: AtomicUsize::new(0),
            }
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl FileSystem for CountingFs {
        fn kind(&self) -> &'static str {
            "counting"
        }

        fn is_read_only(&self) -> bool {
            self.inner.is_read_only()
        }

        fn stat(&self, path: &MountPath) -> Result<Option<EntryKind>, BackendError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.stat(path)
        }

        fn has_children(&self, path: &MountPath) -> Result<bool, BackendError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.has_children(path)
        }

        fn read_dir(&self, path: &MountPath) -> Result<Vec<DirEntry>, BackendError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.inner.read_dir(path)
        }
    }

    struct UnmountedFs;

    impl FileSystem for UnmountedFs {
        fn kind(&self) -> &'static str {
            "sd"
        }

        fn is_mounted(&self) -> bool {
            false
        }

        fn is_read_only(&self) -> bool {
            false
        }

        fn stat(&self, _path: &MountPath) -> Result<Option<EntryKind>, BackendError> {
            Ok(None)
        }

        fn has_children(&self, _path: &MountPath) -> Result<bool, BackendError> {
            Ok(false)
        }

        fn read_dir(&self, _path: &MountPath) -> Result<Vec<DirEntry>, BackendError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_read_existing_file() {
        let fs = data_fs();
        let decision = strict().check_file_flags(&fs, "/data/log.txt", FileFlags::READ);
        assert_eq!(
            decision,
            Decision::Approved {
                path: path("/data/log.txt"),
                effective: FileFlags::READ,
            }
        );
    }

    #[test]
    fn test_create_with_delete_conflicts_regardless_of_state() {
        let fs = data_fs();
        for target in ["/data/log.txt", "/data", "/missing", "/../escape"] {
            let decision =
                strict().check_file_flags(&fs, target, FileFlags::CREATE | FileFlags::DELETE);
            assert_eq!(decision.reason(), Some(DenyReason::FlagConflict), "{}", target);
        }

        fs.set_read_only(true);
        let decision =
            strict().check_file_flags(&fs, "/data", FileFlags::CREATE | FileFlags::DELETE);
        assert_eq!(decision.reason(), Some(DenyReason::FlagConflict));
    }

    #[test]
    fn test_conflict_is_decided_before_any_query() {
        let fs = CountingFs::new(data_fs());
        let decision = strict().check_file_flags(&fs, "/data/log.txt", FileFlags::TRUNCATE);
        assert_eq!(decision.reason(), Some(DenyReason::FlagConflict));
        assert_eq!(fs.queries(), 0);
    }

    #[test]
    fn test_escape_is_always_path_escape() {
        let fs = data_fs();
        let masks = [
            FileFlags::READ,
            FileFlags::WRITE | FileFlags::CREATE,
            FileFlags::DELETE | FileFlags::RECURSE,
            FileFlags::LIST,
        ];
        for target in ["../etc/passwd", "/data/../../x", "/.."] {
            for flags in masks {
                let decision = strict().check_file_flags(&fs, target, flags);
                assert_eq!(decision.reason(), Some(DenyReason::PathEscape));
            }
        }
    }

    #[test]
    fn test_malformed_path() {
        let fs = data_fs();
        assert_eq!(
            strict().check_file_flags(&fs, "", FileFlags::READ).reason(),
            Some(DenyReason::InvalidPath)
        );
        assert_eq!(
            strict()
                .check_file_flags(&fs, "/data\\log.txt", FileFlags::READ)
                .reason(),
            Some(DenyReason::InvalidPath)
        );
    }

    #[test]
    fn test_idempotent_without_mutation() {
        let fs = data_fs();
        let checker = strict();
        for (target, flags) in [
            ("/data/log.txt", FileFlags::READ),
            ("/data/log.txt", FileFlags::CREATE),
            ("/data", FileFlags::DELETE),
            ("/new/file.bin", FileFlags::WRITE | FileFlags::CREATE),
        ] {
            let first = checker.check_file_flags(&fs, target, flags);
            let second = checker.check_file_flags(&fs, target, flags);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_create_existing_strict() {
        let fs = data_fs();
        let decision = strict().check_file_flags(&fs, "/data/log.txt", FileFlags::CREATE);
        assert_eq!(decision.reason(), Some(DenyReason::AlreadyExists));
    }

    #[test]
    fn test_create_existing_permissive_drops_create() {
        let fs = data_fs();
        let decision = permissive().check_file_flags(
            &fs,
            "/data/log.txt",
            FileFlags::WRITE | FileFlags::CREATE,
        );
        assert_eq!(decision.effective_flags(), Some(FileFlags::WRITE));

        let decision = permissive().check_file_flags(&fs, "/data/log.txt", FileFlags::CREATE);
        assert_eq!(decision.effective_flags(), Some(FileFlags::empty()));
    }

    #[test]
    fn test_delete_non_empty_directory() {
        let fs = data_fs();
        let decision = strict().check_file_flags(&fs, "/data", FileFlags::DELETE);
        assert_eq!(decision.reason(), Some(DenyReason::NotEmpty));

        let decision =
            strict().check_file_flags(&fs, "/data", FileFlags::DELETE | FileFlags::RECURSE);
        assert_eq!(
            decision.effective_flags(),
            Some(FileFlags::DELETE | FileFlags::RECURSE)
        );
    }

    #[test]
    fn test_delete_drops_needless_recurse() {
        let fs = data_fs();
        fs.create_dir_all(&path("/empty")).unwrap();

        for target in ["/empty", "/data/log.txt"] {
            let decision =
                strict().check_file_flags(&fs, target, FileFlags::DELETE | FileFlags::RECURSE);
            assert_eq!(decision.effective_flags(), Some(FileFlags::DELETE), "{}", target);
        }
    }

    #[test]
    fn test_delete_missing_and_root() {
        let fs = data_fs();
        assert_eq!(
            strict().check_file_flags(&fs, "/nope", FileFlags::DELETE).reason(),
            Some(DenyReason::NotFound)
        );
        assert_eq!(
            strict()
                .check_file_flags(&fs, "/", FileFlags::DELETE | FileFlags::RECURSE)
                .reason(),
            Some(DenyReason::AccessDenied)
        );
    }

    #[test]
    fn test_write_to_read_only_media() {
        let fs = data_fs();
        fs.set_read_only(true);
        for target in ["/data/log.txt", "/does/not/exist"] {
            let decision = strict().check_file_flags(&fs, target, FileFlags::WRITE);
            assert_eq!(decision.reason(), Some(DenyReason::MediaReadonly), "{}", target);
        }
        // Reads still work.
        assert!(strict()
            .check_file_flags(&fs, "/data/log.txt", FileFlags::READ)
            .is_approved());
    }

    #[test]
    fn test_read_requires_file() {
        let fs = data_fs();
        assert_eq!(
            strict().check_file_flags(&fs, "/missing.txt", FileFlags::READ).reason(),
            Some(DenyReason::NotFound)
        );
        assert_eq!(
            strict().check_file_flags(&fs, "/data", FileFlags::READ).reason(),
            Some(DenyReason::WrongType)
        );
    }

    #[test]
    fn test_list_requires_directory() {
        let fs = data_fs();
        assert!(strict()
            .check_file_flags(&fs, "/data", FileFlags::LIST | FileFlags::READ)
            .is_approved());
        assert!(strict()
            .check_file_flags(&fs, "/", FileFlags::LIST | FileFlags::RECURSE)
            .is_approved());
        assert_eq!(
            strict()
                .check_file_flags(&fs, "/data/log.txt", FileFlags::LIST)
                .reason(),
            Some(DenyReason::WrongType)
        );
        assert_eq!(
            strict().check_file_flags(&fs, "/gone", FileFlags::LIST).reason(),
            Some(DenyReason::NotFound)
        );
    }

    #[test]
    fn test_append_requires_existing_file() {
        let fs = data_fs();
        assert_eq!(
            strict().check_file_flags(&fs, "/new.txt", FileFlags::APPEND).reason(),
            Some(DenyReason::NotFound)
        );
        let decision = strict().check_file_flags(&fs, "/data/log.txt", FileFlags::APPEND);
        assert_eq!(
            decision.effective_flags(),
            Some(FileFlags::APPEND | FileFlags::WRITE)
        );
    }

    #[test]
    fn test_create_missing_with_parents() {
        let fs = data_fs();
        let decision = strict().check_file_flags(
            &fs,
            "/logs/2024/boot.txt",
            FileFlags::WRITE | FileFlags::CREATE | FileFlags::TRUNCATE,
        );
        assert_eq!(
            decision.effective_flags(),
            Some(FileFlags::WRITE | FileFlags::CREATE | FileFlags::CREATE_PARENTS)
        );

        let decision = strict().check_file_flags(&fs, "/data/new.txt", FileFlags::CREATE);
        assert_eq!(decision.effective_flags(), Some(FileFlags::CREATE));
    }

    #[test]
    fn test_create_missing_without_parent_creation() {
        let fs = data_fs();
        let checker = FlagChecker::new(CheckPolicy {
            create_parents: false,
            ..CheckPolicy::default()
        });
        let decision = checker.check_file_flags(&fs, "/logs/boot.txt", FileFlags::CREATE);
        assert_eq!(decision.reason(), Some(DenyReason::NotFound));
    }

    #[test]
    fn test_create_below_a_file() {
        let fs = data_fs();
        let decision = strict().check_file_flags(&fs, "/data/log.txt/x", FileFlags::CREATE);
        assert_eq!(decision.reason(), Some(DenyReason::WrongType));
    }

    #[test]
    fn test_overwrite_protect() {
        let fs = data_fs();
        let flags = FileFlags::WRITE | FileFlags::CREATE | FileFlags::OVERWRITE_PROTECT;

        let decision = permissive().check_file_flags(&fs, "/data/log.txt", flags);
        assert_eq!(decision.reason(), Some(DenyReason::AlreadyExists));

        let decision = permissive().check_file_flags(&fs, "/data/fresh.txt", flags);
        assert_eq!(
            decision.effective_flags(),
            Some(FileFlags::WRITE | FileFlags::CREATE)
        );
    }

    #[test]
    fn test_write_to_directory() {
        let fs = data_fs();
        assert_eq!(
            strict().check_file_flags(&fs, "/data", FileFlags::WRITE).reason(),
            Some(DenyReason::WrongType)
        );
    }

    #[test]
    fn test_backend_unavailable() {
        let fs = data_fs();
        fs.set_available(false);
        let decision = strict().check_file_flags(&fs, "/data/log.txt", FileFlags::READ);
        assert_eq!(decision.reason(), Some(DenyReason::BackendUnavailable));
    }

    mod local {
        use super::*;
        use std::fs;
        use std::os::unix::fs::symlink;
        use tempfile::TempDir;

        use crate::backend::LocalFs;

        fn card() -> TempDir {
            let temp_dir = TempDir::new().unwrap();
            fs::create_dir_all(temp_dir.path().join("data")).unwrap();
            fs::write(temp_dir.path().join("data/log.txt"), b"boot ok\n").unwrap();
            temp_dir
        }

        #[test]
        fn test_scenarios_on_host_directory() {
            let root = card();
            let backend = LocalFs::open(root.path(), false).unwrap();

            let decision = strict().check_file_flags(&backend, "/data/log.txt", FileFlags::READ);
            assert_eq!(decision.effective_flags(), Some(FileFlags::READ));

            let decision = strict().check_file_flags(&backend, "/data", FileFlags::DELETE);
            assert_eq!(decision.reason(), Some(DenyReason::NotEmpty));

            let decision = strict().check_file_flags(
                &backend,
                "/logs/boot.txt",
                FileFlags::CREATE | FileFlags::WRITE,
            );
            assert!(decision
                .effective_flags()
                .unwrap()
                .contains(FileFlags::CREATE_PARENTS));
        }

        #[test]
        fn test_create_through_dangling_link_escapes() {
            let root = card();
            let outside = TempDir::new().unwrap();
            symlink(outside.path().join("planted.txt"), root.path().join("trap")).unwrap();
            let backend = LocalFs::open(root.path(), false).unwrap();

            let decision = strict().check_file_flags(
                &backend,
                "/trap",
                FileFlags::WRITE | FileFlags::CREATE,
            );
            assert_eq!(decision.reason(), Some(DenyReason::PathEscape));

            let decision = strict().check_file_flags(
                &backend,
                "/trap/nested/file.txt",
                FileFlags::WRITE | FileFlags::CREATE,
            );
            assert_eq!(decision.reason(), Some(DenyReason::PathEscape));
            assert!(!outside.path().join("planted.txt").exists());
        }

        #[test]
        fn test_pulled_card_is_unavailable() {
            let root = card();
            let card_dir = root.path().join("data");
            let backend = LocalFs::open(&card_dir, false).unwrap();
            fs::remove_dir_all(&card_dir).unwrap();

            for flags in [FileFlags::READ, FileFlags::WRITE | FileFlags::CREATE, FileFlags::LIST] {
                let decision = strict().check_file_flags(&backend, "/log.txt", flags);
                assert_eq!(decision.reason(), Some(DenyReason::BackendUnavailable));
            }
            let decision = strict().check_file_flags(&backend, "/", FileFlags::LIST);
            assert_eq!(decision.reason(), Some(DenyReason::BackendUnavailable));
        }
    }

    #[test]
    fn test_rules_hide_and_restrict() {
        let fs = data_fs();
        fs.write_file(&path("/System Volume Information/IndexerVolumeGuid"), b"x")
            .unwrap();
        fs.write_file(&path("/config/wifi.json"), b"{}").unwrap();
        let rules = AccessRules::compile(
            &[
                AccessRule::hidden("/System Volume Information"),
                AccessRule::read_only("/config"),
            ],
            AccessLevel::Full,
            255,
        )
        .unwrap();
        let checker = strict();

        let decision = checker.check_with_rules(
            &fs,
            &rules,
            "/System Volume Information/IndexerVolumeGuid",
            FileFlags::READ,
        );
        assert_eq!(decision.reason(), Some(DenyReason::NotFound));

        assert!(checker
            .check_with_rules(&fs, &rules, "/config/wifi.json", FileFlags::READ)
            .is_approved());
        assert_eq!(
            checker
                .check_with_rules(&fs, &rules, "/config/wifi.json", FileFlags::WRITE)
                .reason(),
            Some(DenyReason::AccessDenied)
        );
        assert_eq!(
            checker
                .check_with_rules(&fs, &rules, "/config/wifi.json", FileFlags::DELETE)
                .reason(),
            Some(DenyReason::AccessDenied)
        );
        // The root itself is never deletable.
        assert_eq!(
            checker
                .check_with_rules(&fs, &rules, "/", FileFlags::DELETE | FileFlags::RECURSE)
                .reason(),
            Some(DenyReason::AccessDenied)
        );
    }

    #[test]
    fn test_recursive_delete_crossing_protected_rule() {
        let fs = data_fs();
        fs.write_file(&path("/data/keep/settings.ini"), b"x").unwrap();
        let rules = AccessRules::compile(
            &[AccessRule::read_only("/data/keep")],
            AccessLevel::Full,
            255,
        )
        .unwrap();

        let decision = strict().check_with_rules(
            &fs,
            &rules,
            "/data",
            FileFlags::DELETE | FileFlags::RECURSE,
        );
        assert_eq!(decision.reason(), Some(DenyReason::AccessDenied));
    }

    #[test]
    fn test_create_mode_from_str() {
        assert_eq!("strict".parse::<CreateMode>().unwrap(), CreateMode::Strict);
        assert_eq!("Permissive".parse::<CreateMode>().unwrap(), CreateMode::Permissive);
        assert!("lenient".parse::<CreateMode>().is_err());
    }

    #[test]
    #[should_panic(expected = "unmounted")]
    fn test_unmounted_backend_is_a_bug() {
        strict().check_file_flags(&UnmountedFs, "/", FileFlags::READ);
    }
}
