//! Per-mount path access rules.
//!
//! A mount can restrict what the file manager may do below certain paths
//! (read-only system folders, hidden card metadata, undeletable config
//! files). Rules are matched lexically on normalized paths; the most
//! specific match wins.

use serde::{Deserialize, Serialize};

use super::path::{MountPath, PathError};

/// Access level granted below a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// No access.
    None,
    /// Read and list only.
    Read,
    /// Read, list, write and create.
    ReadWrite,
    /// Everything, including delete.
    #[default]
    Full,
}

impl AccessLevel {
    /// Check if this level allows reading and listing.
    pub fn can_read(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite | Self::Full)
    }

    /// Check if this level allows writing and creating.
    pub fn can_write(&self) -> bool {
        matches!(self, Self::ReadWrite | Self::Full)
    }

    /// Check if this level allows deleting.
    pub fn can_delete(&self) -> bool {
        matches!(self, Self::Full)
    }
}

/// One rule as written in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// The path this rule applies to.
    pub path: String,
    /// The access level.
    #[serde(default)]
    pub level: AccessLevel,
    /// Whether this rule applies to everything below `path`.
    #[serde(default = "default_recursive")]
    pub recursive: bool,
    /// Whether matching paths are invisible (reported as missing).
    #[serde(default)]
    pub hidden: bool,
}

fn default_recursive() -> bool {
    true
}

impl AccessRule {
    /// Create a new rule.
    pub fn new(path: impl Into<String>, level: AccessLevel, recursive: bool) -> Self {
        Self {
            path: path.into(),
            level,
            recursive,
            hidden: false,
        }
    }

    /// Create a recursive read-only rule.
    pub fn read_only(path: impl Into<String>) -> Self {
        Self::new(path, AccessLevel::Read, true)
    }

    /// Create a recursive rule hiding everything below `path`.
    pub fn hidden(path: impl Into<String>) -> Self {
        Self {
            hidden: true,
            ..Self::new(path, AccessLevel::None, true)
        }
    }
}

/// What the rules say about one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleVerdict {
    pub level: AccessLevel,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    path: MountPath,
    level: AccessLevel,
    recursive: bool,
    hidden: bool,
}

impl CompiledRule {
    fn matches(&self, path: &MountPath) -> bool {
        if self.recursive {
            path.starts_with(&self.path)
        } else {
            *path == self.path
        }
    }

    fn restricts_delete(&self) -> bool {
        self.hidden || !self.level.can_delete()
    }
}

/// Compiled rules of one mount.
#[derive(Debug, Clone)]
pub struct AccessRules {
    rules: Vec<CompiledRule>,
    default_level: AccessLevel,
}

impl AccessRules {
    /// Rules that allow everything.
    pub fn allow_all() -> Self {
        Self {
            rules: Vec::new(),
            default_level: AccessLevel::Full,
        }
    }

    /// Compile configured rules. Rule paths are normalized like request
    /// paths.
    pub fn compile(
        rules: &[AccessRule],
        default_level: AccessLevel,
        max_path_len: usize,
    ) -> Result<Self, PathError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    path: MountPath::parse(&rule.path, max_path_len)?,
                    level: rule.level,
                    recursive: rule.recursive,
                    hidden: rule.hidden,
                })
            })
            .collect::<Result<Vec<_>, PathError>>()?;
        Ok(Self {
            rules,
            default_level,
        })
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate the rules for `path`.
    ///
    /// The longest matching rule decides the level. A path is hidden if it
    /// lies below any hidden rule, so a more specific rule cannot reveal
    /// something inside a hidden folder.
    pub fn evaluate(&self, path: &MountPath) -> RuleVerdict {
        let mut best_match: Option<&CompiledRule> = None;
        let mut best_match_len = 0;
        let mut hidden = false;

        for rule in &self.rules {
            if !rule.matches(path) {
                continue;
            }
            hidden |= rule.hidden;

            let rule_len = rule.path.as_str().len();
            if best_match.is_none() || rule_len > best_match_len {
                best_match = Some(rule);
                best_match_len = rule_len;
            }
        }

        RuleVerdict {
            level: best_match.map(|r| r.level).unwrap_or(self.default_level),
            hidden,
        }
    }

    /// Whether any rule strictly below `path` forbids deletion or hides
    /// something. A recursive delete of `path` would cross that rule.
    pub fn restricts_below(&self, path: &MountPath) -> bool {
        self.rules
            .iter()
            .any(|rule| rule.path != *path && rule.path.starts_with(path) && rule.restricts_delete())
    }
}

impl Default for AccessRules {
    fn default() -> Self {
        Self::allow_all()
    }
}
