//! Mounted filesystems, addressed by label.
//!
//! Registration happens during setup; afterwards the registry is sealed and
//! only read. The lock stays in place so that registration and lookup share
//! one exclusion mechanism even if a caller never seals.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use protocol::messages::MountInfo;
use thiserror::Error;
use tracing::info;

use super::rules::AccessRules;
use crate::backend::FileSystem;

/// Longest accepted mount label.
pub const MAX_LABEL_LEN: usize = 32;

/// Errors raised while registering a mount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("mount label already registered: {0}")]
    DuplicateMount(String),

    #[error("invalid mount label {0:?}: use 1-32 ASCII letters, digits, '-' or '_'")]
    InvalidLabel(String),

    #[error("registry is sealed, cannot register {0}")]
    Sealed(String),
}

/// One mounted filesystem.
pub struct Mount {
    label: String,
    fs: Arc<dyn FileSystem>,
    rules: AccessRules,
}

impl Mount {
    pub fn new(label: impl Into<String>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            label: label.into(),
            fs,
            rules: AccessRules::allow_all(),
        }
    }

    pub fn with_rules(mut self, rules: AccessRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn rules(&self) -> &AccessRules {
        &self.rules
    }

    /// Wire description of this mount.
    pub fn info(&self) -> MountInfo {
        let usage = self.fs.usage();
        MountInfo {
            label: self.label.clone(),
            kind: self.fs.kind().to_string(),
            read_only: self.fs.is_read_only(),
            total_bytes: usage.map(|u| u.total_bytes),
            used_bytes: usage.map(|u| u.used_bytes),
        }
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("label", &self.label)
            .field("kind", &self.fs.kind())
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[derive(Default)]
struct RegistryState {
    mounts: Vec<Arc<Mount>>,
    sealed: bool,
}

/// Label to filesystem map, in registration order.
#[derive(Default)]
pub struct FileSystemRegistry {
    state: RwLock<RegistryState>,
}

impl FileSystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mount. Fails on a malformed or duplicate label, or once
    /// the registry is sealed.
    pub fn register(&self, mount: Mount) -> Result<Arc<Mount>, RegistryError> {
        validate_label(mount.label())?;

        let mut state = self.write_state();
        if state.sealed {
            return Err(RegistryError::Sealed(mount.label.clone()));
        }
        if state.mounts.iter().any(|m| m.label == mount.label) {
            return Err(RegistryError::DuplicateMount(mount.label.clone()));
        }

        info!(
            "Mounted {} ({}, read_only={}, {} rules)",
            mount.label,
            mount.fs.kind(),
            mount.fs.is_read_only(),
            mount.rules.len()
        );
        let mount = Arc::new(mount);
        state.mounts.push(Arc::clone(&mount));
        Ok(mount)
    }

    /// Look up a mount by label.
    pub fn get(&self, label: &str) -> Option<Arc<Mount>> {
        self.read_state()
            .mounts
            .iter()
            .find(|m| m.label == label)
            .cloned()
    }

    /// Labels in registration order.
    pub fn labels(&self) -> Vec<String> {
        self.read_state()
            .mounts
            .iter()
            .map(|m| m.label.clone())
            .collect()
    }

    pub fn mounts_info(&self) -> Vec<MountInfo> {
        self.read_state().mounts.iter().map(|m| m.info()).collect()
    }

    /// Refuse further registrations.
    pub fn seal(&self) {
        self.write_state().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.read_state().sealed
    }

    pub fn len(&self) -> usize {
        self.read_state().mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Mounts are never left half-registered, so a poisoned lock still
    // guards consistent data.
    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Check a mount label.
pub fn validate_label(label: &str) -> Result<(), RegistryError> {
    let valid = !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidLabel(label.to_string()))
    }
}
