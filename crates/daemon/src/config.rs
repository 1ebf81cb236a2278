//! Configuration management for the file manager daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filemanager/config.toml`.

use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::registry::validate_label;
use crate::files::{
    AccessLevel, AccessRule, AccessRules, CheckPolicy, CreateMode, DEFAULT_MAX_PATH_LEN,
};
use crate::FILEMANAGER_PORT;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("max_path_len must be between 1 and 4096, got {0}")]
    InvalidMaxPathLen(usize),

    #[error("metadata_timeout_ms must be between 1 and 60000, got {0}")]
    InvalidMetadataTimeout(u64),

    #[error("mount label {0:?} is invalid")]
    InvalidMountLabel(String),

    #[error("mount label {0:?} is used more than once")]
    DuplicateMount(String),

    #[error("directory mount {0:?} needs a root")]
    MissingMountRoot(String),

    #[error("mount {label:?} has an invalid rule path {path:?}")]
    InvalidRulePath { label: String, path: String },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the file manager daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Flag checker policy.
    pub policy: PolicyConfig,

    /// Filesystems to mount, in registration order.
    pub mounts: Vec<MountConfig>,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the default flash mount.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind the listener to.
    pub bind_address: String,

    /// Listener port; 0 picks a free port.
    pub port: u16,

    /// Upper bound for the metadata queries of one request, in milliseconds.
    pub metadata_timeout_ms: u64,
}

/// Flag checker policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// What CREATE means for an existing path.
    pub create_mode: CreateMode,

    /// Approve CREATE below missing directories.
    pub create_parents: bool,

    /// Longest accepted normalized path.
    pub max_path_len: usize,

    /// List dot files.
    pub include_hidden: bool,
}

/// Backend kind of a mount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// A host directory.
    #[default]
    Directory,
    /// An in-memory tree.
    Memory,
}

/// One filesystem to mount.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountConfig {
    /// Label used in requests.
    pub label: String,

    #[serde(default)]
    pub kind: MountKind,

    /// Root directory for `directory` mounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub read_only: bool,

    /// Abort setup if this mount fails.
    #[serde(default = "default_true")]
    pub required: bool,

    /// Create a missing root directory instead of failing.
    #[serde(default)]
    pub create_root: bool,

    /// Capacity reported by `memory` mounts, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,

    /// Access level for paths no rule matches.
    #[serde(default)]
    pub default_level: AccessLevel,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AccessRule>,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        let daemon = DaemonConfig::default();
        let flash = MountConfig::directory("flash", daemon.data_dir.join("flash"));
        Self {
            daemon,
            server: ServerConfig::default(),
            policy: PolicyConfig::default(),
            mounts: vec![MountConfig {
                create_root: true,
                ..flash
            }],
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: FILEMANAGER_PORT,
            metadata_timeout_ms: 2000,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            create_mode: CreateMode::Strict,
            create_parents: true,
            max_path_len: DEFAULT_MAX_PATH_LEN,
            include_hidden: false,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl PolicyConfig {
    /// Checker policy described by this section.
    pub fn check_policy(&self) -> CheckPolicy {
        CheckPolicy {
            create_mode: self.create_mode,
            create_parents: self.create_parents,
            max_path_len: self.max_path_len,
        }
    }
}

impl MountConfig {
    /// A required, writable host-directory mount.
    pub fn directory(label: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            kind: MountKind::Directory,
            root: Some(root.into()),
            read_only: false,
            required: true,
            create_root: false,
            capacity: None,
            default_level: AccessLevel::Full,
            rules: Vec::new(),
        }
    }

    /// A required, writable in-memory mount.
    pub fn memory(label: impl Into<String>, capacity: Option<u64>) -> Self {
        Self {
            label: label.into(),
            kind: MountKind::Memory,
            root: None,
            read_only: false,
            required: true,
            create_root: false,
            capacity,
            default_level: AccessLevel::Full,
            rules: Vec::new(),
        }
    }

    /// Compile this mount's access rules.
    pub fn access_rules(&self, max_path_len: usize) -> Result<AccessRules, ConfigError> {
        AccessRules::compile(&self.rules, self.default_level, max_path_len).map_err(|_| {
            let path = self
                .rules
                .iter()
                .find(|r| crate::files::MountPath::parse(&r.path, max_path_len).is_err())
                .map(|r| r.path.clone())
                .unwrap_or_default();
            ConfigError::InvalidRulePath {
                label: self.label.clone(),
                path,
            }
        })
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filemanager")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filemanager")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEMANAGER_PORT: Override the listener port
    /// - FILEMANAGER_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEMANAGER_CREATE_MODE: Override the create mode (strict, permissive)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("FILEMANAGER_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.server.port = port;
                    }
                    Err(_) => tracing::warn!("Ignoring invalid FILEMANAGER_PORT: {}", port),
                }
            }
        }

        if let Ok(level) = std::env::var("FILEMANAGER_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(mode) = std::env::var("FILEMANAGER_CREATE_MODE") {
            if !mode.is_empty() {
                match mode.parse::<CreateMode>() {
                    Ok(mode) => {
                        tracing::info!("Overriding create_mode from environment: {:?}", mode);
                        self.policy.create_mode = mode;
                    }
                    Err(e) => tracing::warn!("Ignoring FILEMANAGER_CREATE_MODE: {}", e),
                }
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.server.bind_address.clone(),
            ));
        }

        if self.server.metadata_timeout_ms == 0 || self.server.metadata_timeout_ms > 60_000 {
            return Err(ConfigError::InvalidMetadataTimeout(
                self.server.metadata_timeout_ms,
            ));
        }

        if self.policy.max_path_len == 0 || self.policy.max_path_len > 4096 {
            return Err(ConfigError::InvalidMaxPathLen(self.policy.max_path_len));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        let mut seen = HashSet::new();
        for mount in &self.mounts {
            if validate_label(&mount.label).is_err() {
                return Err(ConfigError::InvalidMountLabel(mount.label.clone()));
            }
            if !seen.insert(mount.label.as_str()) {
                return Err(ConfigError::DuplicateMount(mount.label.clone()));
            }
            if mount.kind == MountKind::Directory && mount.root.is_none() {
                return Err(ConfigError::MissingMountRoot(mount.label.clone()));
            }
            mount.access_rules(self.policy.max_path_len)?;
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("FILEMANAGER_PORT");
        std::env::remove_var("FILEMANAGER_LOG_LEVEL");
        std::env::remove_var("FILEMANAGER_CREATE_MODE");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.server.port, FILEMANAGER_PORT);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.policy.create_mode, CreateMode::Strict);
        assert!(config.policy.create_parents);
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].label, "flash");
        assert!(config.mounts[0].create_root);
        assert!(config.daemon.data_dir.to_string_lossy().contains("filemanager"));
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 9000

[policy]
create_mode = "permissive"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.policy.create_mode, CreateMode::Permissive);
        // Other values should be defaults
        assert_eq!(config.server.metadata_timeout_ms, 2000);
        assert_eq!(config.mounts.len(), 1);
    }

    #[test]
    fn test_from_toml_mounts() {
        let toml = r#"
[[mounts]]
label = "sd"
root = "/media/sd"
read_only = true
required = false

[[mounts.rules]]
path = "/System Volume Information"
level = "none"
hidden = true

[[mounts.rules]]
path = "/config"
level = "read"

[[mounts]]
label = "ram"
kind = "memory"
capacity = 65536
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.mounts.len(), 2);
        let sd = &config.mounts[0];
        assert_eq!(sd.kind, MountKind::Directory);
        assert_eq!(sd.root, Some(PathBuf::from("/media/sd")));
        assert!(sd.read_only);
        assert!(!sd.required);
        assert_eq!(sd.rules.len(), 2);
        assert!(sd.rules[0].hidden);
        assert_eq!(sd.rules[1].level, AccessLevel::Read);

        let ram = &config.mounts[1];
        assert_eq!(ram.kind, MountKind::Memory);
        assert_eq!(ram.capacity, Some(65536));
        assert!(ram.required);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
port = 1
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_mount_rules_compile() {
        let toml = r#"
[[mounts]]
label = "sd"
root = "/media/sd"
default_level = "read"

[[mounts.rules]]
path = "/upload"
level = "readwrite"

[[mounts.rules]]
path = "/upload/.trash"
hidden = true
"#;
        let config = Config::from_toml(toml).unwrap();
        let rules = config.mounts[0]
            .access_rules(config.policy.max_path_len)
            .unwrap();
        let path = |raw: &str| crate::files::MountPath::parse(raw, 255).unwrap();

        assert_eq!(rules.evaluate(&path("/boot.bin")).level, AccessLevel::Read);
        assert_eq!(
            rules.evaluate(&path("/upload/photo.jpg")).level,
            AccessLevel::ReadWrite
        );
        assert!(rules.evaluate(&path("/upload/.trash/old.jpg")).hidden);
    }

    #[test]
    fn test_unknown_create_mode_rejected() {
        let toml = r#"
[policy]
create_mode = "lenient"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut original = Config::default();
        original.policy.create_mode = CreateMode::Permissive;
        original.mounts.push(MountConfig {
            rules: vec![AccessRule::read_only("/config")],
            ..MountConfig::memory("ram", Some(1024))
        });

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[[mounts]]"));
        let loaded = Config::from_toml(&toml).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_policy_section() {
        let toml = r#"
[policy]
create_parents = false
max_path_len = 128
include_hidden = true
"#;
        let config = Config::from_toml(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.create_mode, CreateMode::Strict);
        assert!(config.policy.include_hidden);

        let policy = config.policy.check_policy();
        assert!(!policy.create_parents);
        assert_eq!(policy.max_path_len, 128);
    }

    #[test]
    fn test_rule_longer_than_max_path_len() {
        let mut config = Config::default();
        config.policy.max_path_len = 8;
        config.mounts = vec![MountConfig {
            rules: vec![AccessRule::read_only("/configuration")],
            ..MountConfig::memory("ram", None)
        }];
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRulePath {
                label: "ram".to_string(),
                path: "/configuration".to_string(),
            })
        );
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "this is not [valid toml").unwrap();

        let err = format!("{:#}", Config::load(&path).unwrap_err());
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("filemanager/config.toml"));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_bind_address() {
        let mut config = Config::default();
        config.server.bind_address = "::1".to_string();
        config.server.port = 0;
        assert!(config.validate().is_ok());
        assert_eq!(
            config.server.socket_addr().unwrap(),
            "[::1]:0".parse::<SocketAddr>().unwrap()
        );

        config.server.bind_address = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress("localhost".to_string()))
        );
    }

    #[test]
    fn test_validate_timeout() {
        let mut config = Config::default();
        config.server.metadata_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMetadataTimeout(0)));

        config.server.metadata_timeout_ms = 60_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_path_len() {
        let mut config = Config::default();
        config.policy.max_path_len = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxPathLen(0)));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_mounts() {
        let mut config = Config::default();
        config.mounts.push(MountConfig::memory("flash", None));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateMount("flash".to_string()))
        );

        config.mounts = vec![MountConfig::memory("sd card", None)];
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMountLabel("sd card".to_string()))
        );

        config.mounts = vec![MountConfig {
            root: None,
            ..MountConfig::directory("sd", "/x")
        }];
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingMountRoot("sd".to_string()))
        );

        config.mounts = vec![MountConfig {
            rules: vec![AccessRule::read_only("/../etc")],
            ..MountConfig::memory("ram", None)
        }];
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidRulePath {
                label: "ram".to_string(),
                path: "/../etc".to_string(),
            })
        );
    }

    #[test]
    fn test_check_policy() {
        let policy = PolicyConfig {
            create_mode: CreateMode::Permissive,
            create_parents: false,
            max_path_len: 64,
            include_hidden: true,
        };
        let check = policy.check_policy();
        assert_eq!(check.create_mode, CreateMode::Permissive);
        assert!(!check.create_parents);
        assert_eq!(check.max_path_len, 64);
    }

    #[test]
    #[serial]
    fn test_env_override_port() {
        clear_env();
        std::env::set_var("FILEMANAGER_PORT", "8181");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 8181);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        clear_env();
        std::env::set_var("FILEMANAGER_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, FILEMANAGER_PORT);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        clear_env();
        std::env::set_var("FILEMANAGER_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "debug");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("FILEMANAGER_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "info");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_create_mode() {
        clear_env();
        std::env::set_var("FILEMANAGER_CREATE_MODE", "permissive");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.policy.create_mode, CreateMode::Permissive);

        std::env::set_var("FILEMANAGER_CREATE_MODE", "bogus");
        config.apply_env_overrides();
        assert_eq!(config.policy.create_mode, CreateMode::Permissive);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_unset_does_not_override() {
        clear_env();
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());
    }
}
