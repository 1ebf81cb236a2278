//! Mounts, paths and the decision logic in front of every file operation.
//!
//! - [`path`]: lexical normalization of request paths inside a mount
//! - [`rules`]: per-mount access rules
//! - [`checker`]: the flag checker deciding whether an operation may run
//! - [`registry`]: mounted filesystems by label
//! - [`browser`]: checked directory listings
//!
//! # Security
//!
//! Paths are normalized before any backend sees them and a `..` that climbs
//! above the mount root is refused outright. Backends that follow links
//! confine the resolved location to the mount root as well.

pub mod browser;
pub mod checker;
pub mod path;
pub mod registry;
pub mod rules;

pub use browser::{BrowserError, DirectoryBrowser, DirectoryEntry};
pub use checker::{CheckPolicy, CreateMode, Decision, Denial, FlagChecker, DEFAULT_MAX_PATH_LEN};
pub use path::{MountPath, PathError};
pub use registry::{FileSystemRegistry, Mount, RegistryError};
pub use rules::{AccessLevel, AccessRule, AccessRules, RuleVerdict};
