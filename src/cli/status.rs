//! `hotswap status`

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

use super::common::load_engine;
use crate::upgrade::version_check::format_version_info;

/// Show installed version and update status
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Ask the release registry for the latest version
    #[arg(long)]
    pub online: bool,
}

/// Print version, marker, install directory and backup count.
pub async fn execute(args: StatusArgs, config_path: Option<PathBuf>) -> Result<()> {
    let engine = load_engine(config_path, true).await?;
    let state = engine.installation_state()?;

    let latest = if args.online {
        match engine.check_for_update().await {
            Ok(release) => release.map(|r| r.version().to_string()),
            Err(e) => {
                debug!("Failed to check for updates: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    println!("{}", format_version_info(&state.running, latest.as_deref()));
    match state.marker.as_deref() {
        Some(marker) if state.is_consistent() => println!("Marker:          {marker}"),
        Some(marker) => println!("Marker:          {}", format!("{marker} (out of date)").yellow()),
        None => println!("Marker:          {}", "not set".yellow()),
    }
    println!("Install dir:     {}", engine.config().install.install_dir.display());

    let backups = engine.backups().list().await?;
    println!("Backups:         {}", backups.len());
    Ok(())
}
