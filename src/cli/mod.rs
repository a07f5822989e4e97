//! Command-line interface for hotswap.
//!
//! Every command loads the engine configuration (see [`crate::config::EngineConfig`]),
//! builds an [`UpdateEngine`](crate::upgrade::UpdateEngine) wired to the terminal,
//! and runs one engine operation.
//!
//! # Commands
//!
//! - `check`: ask the release registry whether a newer version exists
//! - `update [TAG]`: download, back up, merge and relaunch
//! - `restore [VERSION]`: put a backup back in place, or `--list` the backups
//! - `repair`: restore missing required files and reconcile the version marker
//! - `status`: installed version, marker, and the last known release
//!
//! # Global Options
//!
//! - `--config <PATH>`: engine configuration file (also `HOTSWAP_CONFIG`)
//! - `--verbose` / `--quiet`: log level
//! - `--no-progress`: hide spinners and download bars
//!
//! # Example
//!
//! ```bash
//! hotswap --config ./hotswap.toml check
//! hotswap update --yes
//! hotswap restore --list
//! ```

mod check;
pub mod common;
mod repair;
mod restore;
mod status;
mod update;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// `None` means quiet.
    pub log_level: Option<String>,

    pub no_progress: bool,

    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export settings read by code that has no access to the parsed arguments.
    pub fn apply_to_env(&self) {
        if self.no_progress {
            // SAFETY: called once from `execute_with_config` before any command
            // spawns tasks that read the environment.
            unsafe {
                std::env::set_var("HOTSWAP_NO_PROGRESS", "1");
            }
        }
    }
}

#[derive(Parser)]
#[command(
    name = "hotswap",
    about = "Self-update, repair and backup/restore for desktop applications",
    version,
    long_about = "hotswap keeps an installed application up to date from its release feed, \
                  backs the installation up before every change, and repairs it when \
                  required files go missing."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the engine configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable progress indicators
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a newer release is available
    Check(check::CheckArgs),

    /// Install the latest release, or a specific tag
    Update(update::UpdateArgs),

    /// Restore the installation from a backup
    Restore(restore::RestoreArgs),

    /// Restore missing required files
    Repair(repair::RepairArgs),

    /// Show installed version and update status
    Status(status::StatusArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.apply_to_env();
        let path = config.config_path;

        match self.command {
            Commands::Check(args) => check::execute(args, path).await,
            Commands::Update(args) => update::execute(args, path).await,
            Commands::Restore(args) => restore::execute(args, path).await,
            Commands::Repair(args) => repair::execute(args, path).await,
            Commands::Status(args) => status::execute(args, path).await,
        }
    }
}
