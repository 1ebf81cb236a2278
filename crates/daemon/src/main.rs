//! File Manager Daemon
//!
//! Serves mounted filesystems and answers operation checks over TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use filemanager::config::{default_config_path, Config};
use filemanager::files::{Decision, DirectoryBrowser, Mount};
use filemanager::protocol::messages::{CheckResponse, FileEntryType, ListResponse, MountInfo};
use filemanager::protocol::{describe_flags, parse_flag_list};
use filemanager::{FileManager, FileManagerClient};
use tracing_subscriber::EnvFilter;

/// File Manager Daemon - mounted filesystems behind an operation checker.
#[derive(Parser, Debug)]
#[command(name = "filemanager-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Mount the configured filesystems and serve requests until interrupted
    Start,

    /// Check whether an operation may be applied to a path
    Check {
        /// Mount label
        #[arg(long, short)]
        mount: String,

        /// Path inside the mount
        #[arg(long, short)]
        path: String,

        /// Requested flags, e.g. `read,write` or `create|truncate`
        #[arg(long, short)]
        flags: String,

        /// Ask a running daemon at this address instead of checking locally
        #[arg(long, value_name = "ADDR")]
        remote: Option<String>,
    },

    /// List mounted filesystems
    Mounts {
        /// Ask a running daemon at this address
        #[arg(long, value_name = "ADDR")]
        remote: Option<String>,
    },

    /// List a directory on a mount
    Ls {
        /// Mount label
        #[arg(long, short)]
        mount: String,

        /// Directory path inside the mount
        #[arg(default_value = "/")]
        path: String,

        /// Ask a running daemon at this address
        #[arg(long, value_name = "ADDR")]
        remote: Option<String>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::InitConfig { force } = cli.command {
        return init_config(&config_path, force);
    }

    // Load configuration
    let mut config = Config::load(&config_path)?;

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("Using config file: {:?}", config_path);

    match cli.command {
        Commands::Start => {
            tracing::info!("File manager daemon starting...");
            let mut manager = FileManager::new(config)?;
            run_headless(&mut manager).await?;
        }
        Commands::Check {
            mount,
            path,
            flags,
            remote,
        } => {
            let flags = parse_flag_list(&flags)?;
            let response = match remote {
                Some(addr) => {
                    let mut client = connect(&addr).await?;
                    client.check(&mount, &path, flags).await?
                }
                None => check_locally(config, &mount, &path, flags)?,
            };

            println!("{}", format_check(&response));
            if !response.approved {
                std::process::exit(1);
            }
        }
        Commands::Mounts { remote } => {
            let mounts = match remote {
                Some(addr) => connect(&addr).await?.mounts().await?,
                None => {
                    let manager = FileManager::new(config)?;
                    manager.add_file_systems()?;
                    manager.registry().mounts_info()
                }
            };
            print_mounts_table(&mounts);
        }
        Commands::Ls {
            mount,
            path,
            remote,
        } => {
            let listing = match remote {
                Some(addr) => connect(&addr).await?.list(&mount, &path).await?,
                None => list_locally(config, &mount, &path)?,
            };
            print_listing(&listing);
        }
        Commands::InitConfig { .. } => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// Write the default configuration unless a file is already there.
fn init_config(path: &PathBuf, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

async fn connect(addr: &str) -> anyhow::Result<FileManagerClient> {
    FileManagerClient::connect(addr)
        .await
        .with_context(|| format!("Cannot reach file manager at {}", addr))
}

/// Mount the configured filesystems and look up `label`.
fn mount_locally(manager: &FileManager, label: &str) -> anyhow::Result<Arc<Mount>> {
    manager.add_file_systems()?;
    manager
        .registry()
        .get(label)
        .ok_or_else(|| anyhow::anyhow!("No mount named {:?}", label))
}

fn check_locally(
    config: Config,
    label: &str,
    path: &str,
    flags: filemanager::protocol::FileFlags,
) -> anyhow::Result<CheckResponse> {
    let manager = FileManager::new(config)?;
    let mount = mount_locally(&manager, label)?;

    let decision = manager
        .checker()
        .check_with_rules(mount.fs(), mount.rules(), path, flags);
    Ok(decision_response(label, path, decision))
}

fn list_locally(config: Config, label: &str, path: &str) -> anyhow::Result<ListResponse> {
    let include_hidden = config.policy.include_hidden;
    let manager = FileManager::new(config)?;
    let mount = mount_locally(&manager, label)?;

    let browser = DirectoryBrowser::new(manager.checker().clone(), include_hidden);
    let (dir, entries) = browser
        .list(&mount, path)
        .map_err(|e| anyhow::anyhow!("{}: {}", e.reason(), e))?;
    Ok(ListResponse {
        mount: label.to_string(),
        path: dir.to_string(),
        entries: entries.iter().map(|e| e.to_protocol()).collect(),
    })
}

/// Shape a local decision the way the daemon would answer it.
fn decision_response(label: &str, path: &str, decision: Decision) -> CheckResponse {
    match decision {
        Decision::Approved { path, effective } => {
            CheckResponse::approved(label, path.as_str(), effective)
        }
        Decision::Denied(denial) => {
            CheckResponse::denied(label, path, denial.reason, denial.message)
        }
    }
}

fn format_check(response: &CheckResponse) -> String {
    match response.reason {
        None => format!(
            "approved {}:{} {}",
            response.mount,
            response.path,
            describe_flags(response.effective_flags())
        ),
        Some(reason) => format!(
            "denied {}:{} {} ({}): {}",
            response.mount,
            response.path,
            reason,
            response.status,
            response.message.as_deref().unwrap_or("")
        ),
    }
}

/// Print mounts in a formatted ASCII table.
fn print_mounts_table(mounts: &[MountInfo]) {
    if mounts.is_empty() {
        println!("No filesystems mounted.");
        return;
    }

    let label_width = mounts
        .iter()
        .map(|m| m.label.len())
        .max()
        .unwrap_or(5)
        .max(5);

    println!(
        "{:<label_width$}  {:<10}  {:<4}  {:>10}  {:>10}",
        "LABEL",
        "KIND",
        "MODE",
        "USED",
        "TOTAL",
        label_width = label_width
    );
    println!("{}", "-".repeat(label_width + 44));

    for mount in mounts {
        println!(
            "{:<label_width$}  {:<10}  {:<4}  {:>10}  {:>10}",
            mount.label,
            mount.kind,
            if mount.read_only { "ro" } else { "rw" },
            format_bytes(mount.used_bytes),
            format_bytes(mount.total_bytes),
            label_width = label_width
        );
    }

    println!();
    println!("Total: {} mount(s)", mounts.len());
}

fn print_listing(listing: &ListResponse) {
    println!("{}:{}", listing.mount, listing.path);
    for entry in &listing.entries {
        match entry.entry_type {
            FileEntryType::Directory => println!("  {}/", entry.name),
            FileEntryType::File => {
                println!("  {:<40} {:>10}", entry.name, format_bytes(Some(entry.size)))
            }
            FileEntryType::Other => println!("  {}", entry.name),
        }
    }
}

/// Format a byte count with a binary unit, or `-` when unknown.
fn format_bytes(bytes: Option<u64>) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let Some(bytes) = bytes else {
        return "-".to_string();
    };
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Serve until SIGTERM or SIGINT.
async fn run_headless(manager: &mut FileManager) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    let addr = manager.setup().await?;
    println!("File manager listening on {}", addr);

    let token = manager.shutdown_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT");
            }
        }
        token.cancel();
    });

    manager.run().await
}
