//! # File Manager Daemon Library
//!
//! This crate serves files of one or more mounted filesystems (flash-style
//! stores, removable media, RAM disks) to clients on the network and decides,
//! before anything touches a filesystem, whether a requested operation may
//! proceed.
//!
//! ## Overview
//!
//! - **Flag Checker**: validates an operation bitmask against the path and
//!   the live filesystem state, answering with approval plus effective flags
//!   or a denial reason
//! - **Filesystem Registry**: mounted backends by label, sealed after setup
//! - **Backends**: host directories and in-memory trees behind one
//!   capability trait
//! - **Listener**: JSON-lines requests on [`FILEMANAGER_PORT`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       FileManager                        │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │  Listener   │──▶│ FlagChecker  │──▶│   Registry    │  │
//! │  │ (JSON lines)│   │ + Browser    │   │ label → Mount │  │
//! │  └─────────────┘   └──────────────┘   └───────┬───────┘  │
//! │                                               │          │
//! │                       ┌───────────────────────┴───────┐  │
//! │                       │  FileSystem: LocalFs/MemoryFs │  │
//! │                       └───────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filemanager::{Config, FileManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!
//!     let mut manager = FileManager::new(config)?;
//!     let addr = manager.setup().await?;
//!     println!("listening on {}", addr);
//!
//!     manager.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`backend`]: filesystem capability trait and backends
//! - [`config`]: configuration loading and defaults
//! - [`files`]: paths, access rules, flag checker, registry and browser
//! - [`server`]: listener, request handler and client
//! - [`orchestrator`]: setup and lifecycle

pub mod backend;
pub mod config;
pub mod files;
pub mod orchestrator;
pub mod server;

/// Default port of the file manager listener.
pub const FILEMANAGER_PORT: u16 = 8080;

// Re-export protocol for convenience
pub use protocol;

pub use backend::{BackendError, FileSystem, LocalFs, MemoryFs};
pub use config::Config;
pub use files::{
    CheckPolicy, CreateMode, Decision, Denial, DirectoryBrowser, FileSystemRegistry, FlagChecker,
    Mount, MountPath,
};
pub use orchestrator::{FileManager, ManagerState};
pub use server::{FileManagerClient, ServerError};
