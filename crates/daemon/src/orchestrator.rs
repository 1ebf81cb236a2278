//! File manager bootstrap.
//!
//! [`FileManager`] owns the registry, the checker and the listener. The
//! lifecycle is `new` → [`setup`](FileManager::setup) (mount the configured
//! filesystems, seal the registry, bind the port) → [`run`](FileManager::run)
//! until the shutdown token is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{FileSystem, LocalFs, MemoryFs};
use crate::config::{Config, MountConfig, MountKind};
use crate::files::{DirectoryBrowser, FileSystemRegistry, FlagChecker, Mount};
use crate::server::{self, FileManagerListener, RequestHandler};

/// File manager lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Initial state, not started.
    Stopped,
    /// Mounting filesystems and binding the port.
    Starting,
    /// Listener bound and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// The file manager: mounted filesystems plus the listener serving them.
pub struct FileManager {
    config: Config,
    registry: Arc<FileSystemRegistry>,
    checker: FlagChecker,
    state: Arc<RwLock<ManagerState>>,
    listener: Option<FileManagerListener>,
    local_addr: Option<SocketAddr>,
    shutdown_token: CancellationToken,
}

impl FileManager {
    /// Create a file manager for `config`. Nothing is mounted yet.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let checker = FlagChecker::new(config.policy.check_policy());

        Ok(Self {
            config,
            registry: Arc::new(FileSystemRegistry::new()),
            checker,
            state: Arc::new(RwLock::new(ManagerState::Stopped)),
            listener: None,
            local_addr: None,
            shutdown_token: CancellationToken::new(),
        })
    }

    /// Mount every configured filesystem into the registry.
    ///
    /// A failing `required` mount aborts with an error; an optional one is
    /// logged and skipped. Returns the number of mounts added.
    pub fn add_file_systems(&self) -> Result<usize> {
        let max_path_len = self.config.policy.max_path_len;
        let mut added = 0;

        for mount_config in &self.config.mounts {
            let result = build_mount(mount_config, max_path_len)
                .and_then(|mount| self.registry.register(mount).map_err(Into::into));
            match result {
                Ok(_) => added += 1,
                Err(e) if mount_config.required => {
                    return Err(e)
                        .with_context(|| format!("Failed to mount {}", mount_config.label));
                }
                Err(e) => warn!("Skipping optional mount {}: {:#}", mount_config.label, e),
            }
        }

        Ok(added)
    }

    /// Mount the filesystems, seal the registry and bind the listener.
    ///
    /// Returns the bound address.
    pub async fn setup(&mut self) -> Result<SocketAddr> {
        {
            let mut state = self.state.write().await;
            if *state != ManagerState::Stopped {
                bail!("File manager is already set up");
            }
            *state = ManagerState::Starting;
        }

        match self.setup_inner().await {
            Ok(addr) => {
                *self.state.write().await = ManagerState::Running;
                info!(
                    "File manager listening on {} with {} mounts",
                    addr,
                    self.registry.len()
                );
                Ok(addr)
            }
            Err(e) => {
                *self.state.write().await = ManagerState::Stopped;
                Err(e)
            }
        }
    }

    async fn setup_inner(&mut self) -> Result<SocketAddr> {
        let added = self.add_file_systems()?;
        if added == 0 {
            warn!("No filesystems mounted");
        }
        self.registry.seal();

        let addr = self.config.server.socket_addr()?;
        let listener = FileManagerListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind file manager port {}", addr))?;
        let local_addr = listener.local_addr()?;

        self.listener = Some(listener);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Serve requests until [`stop`](Self::stop) is called or the shutdown
    /// token is cancelled.
    pub async fn run(&mut self) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            bail!("File manager is not set up");
        };

        let handler = RequestHandler::new(
            Arc::clone(&self.registry),
            self.checker.clone(),
            DirectoryBrowser::new(self.checker.clone(), self.config.policy.include_hidden),
            Duration::from_millis(self.config.server.metadata_timeout_ms),
        );
        server::serve(listener, handler, self.shutdown_token.clone()).await;

        *self.state.write().await = ManagerState::Stopped;
        info!("File manager stopped");
        Ok(())
    }

    /// Ask a running file manager to shut down.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if *state == ManagerState::Running {
                *state = ManagerState::ShuttingDown;
            }
        }
        info!("Stopping file manager...");
        self.shutdown_token.cancel();
    }

    /// Returns the current state.
    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    /// Address the listener is bound to, once set up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<FileSystemRegistry> {
        &self.registry
    }

    pub fn checker(&self) -> &FlagChecker {
        &self.checker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

/// Build the backend and rules of one configured mount.
fn build_mount(config: &MountConfig, max_path_len: usize) -> Result<Mount> {
    let fs: Arc<dyn FileSystem> = match config.kind {
        MountKind::Memory => {
            let mut memory = MemoryFs::new();
            if let Some(capacity) = config.capacity {
                memory = memory.with_capacity(capacity);
            }
            memory.set_read_only(config.read_only);
            Arc::new(memory)
        }
        MountKind::Directory => {
            let root = config
                .root
                .as_ref()
                .with_context(|| format!("Mount {} has no root", config.label))?;
            if config.create_root && !root.exists() {
                std::fs::create_dir_all(root)
                    .with_context(|| format!("Failed to create {}", root.display()))?;
            }
            let local = LocalFs::open(root, config.read_only)
                .with_context(|| format!("Failed to open {}", root.display()))?;
            Arc::new(local)
        }
    };

    let rules = config.access_rules(max_path_len)?;
    Ok(Mount::new(config.label.clone(), fs).with_rules(rules))
}
