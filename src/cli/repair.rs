//! `hotswap repair`: the startup guard, run on demand.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use super::common::load_engine;

/// Restore missing required files and reconcile the version marker
#[derive(Parser, Debug)]
pub struct RepairArgs {}

/// Run the startup guard, then the startup update check when it is enabled.
pub async fn execute(_args: RepairArgs, config_path: Option<PathBuf>) -> Result<()> {
    let engine = load_engine(config_path, true).await?;
    let report = engine.startup_guard().await?;

    if report.is_noop() {
        println!("{}", "All required files are present".green());
    } else {
        let version = report.version.as_deref().unwrap_or("unknown");
        println!(
            "{}",
            format!("Restored {} file(s) from version {}:", report.restored.len(), version).green()
        );
        for file in &report.restored {
            println!("  {file}");
        }
    }

    if let Some(latest) = engine.startup_check().await {
        println!(
            "{}",
            format!("Version {latest} is available, run `hotswap update` to install it").cyan()
        );
    }
    Ok(())
}
