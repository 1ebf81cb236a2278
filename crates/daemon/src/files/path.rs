//! Lexical path normalization inside a mount.
//!
//! Every path handed to a backend is a [`MountPath`]: absolute within the
//! mount, free of `.`/`..` segments and repeated separators. Normalization
//! never touches the filesystem.

use std::fmt;

use thiserror::Error;

/// Errors produced while normalizing a path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    /// The input was empty.
    #[error("path is empty")]
    Empty,

    /// A `..` segment climbs above the mount root.
    #[error("path escapes the mount root: {0}")]
    Escape(String),

    /// The input contains a character no backend accepts.
    #[error("path contains forbidden character {ch:?}: {path}")]
    InvalidChar {
        /// Offending input.
        path: String,
        /// First forbidden character.
        ch: char,
    },

    /// The normalized path is longer than the configured limit.
    #[error("path is {len} bytes, limit is {max}")]
    TooLong {
        /// Normalized length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// A single name was expected but the input had separators or dots.
    #[error("invalid entry name: {0}")]
    InvalidName(String),
}

/// A normalized path inside one mount. Always starts with `/`; the root is
/// the only value ending with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MountPath(String);

impl MountPath {
    /// The mount root.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalize `raw`. Relative input is taken from the mount root.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, PathError> {
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        if let Some(ch) = raw.chars().find(|c| *c == '\\' || c.is_control()) {
            return Err(PathError::InvalidChar {
                path: raw.to_string(),
                ch,
            });
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(PathError::Escape(raw.to_string()));
                    }
                }
                name => segments.push(name),
            }
        }

        let normalized = format!("/{}", segments.join("/"));
        if normalized.len() > max_len {
            return Err(PathError::TooLong {
                len: normalized.len(),
                max: max_len,
            });
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Path segments from the root down.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment; `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Containing directory; `None` for the root.
    pub fn parent(&self) -> Option<MountPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Ancestors from the nearest parent up to the root.
    pub fn ancestors(&self) -> Vec<MountPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(path) = current {
            current = path.parent();
            out.push(path);
        }
        out
    }

    /// Append one entry name.
    pub fn join(&self, name: &str) -> Result<MountPath, PathError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(PathError::InvalidName(name.to_string()));
        }
        if self.is_root() {
            Ok(Self(format!("/{}", name)))
        } else {
            Ok(Self(format!("{}/{}", self.0, name)))
        }
    }

    /// Whether `self` equals `base` or lies below it, compared per segment.
    pub fn starts_with(&self, base: &MountPath) -> bool {
        if base.is_root() || self.0 == base.0 {
            return true;
        }
        self.0.starts_with(&base.0) && self.0.as_bytes().get(base.0.len()) == Some(&b'/')
    }
}

impl fmt::Display for MountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MountPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
