//! `hotswap check`

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use super::common::load_engine;

/// Check whether a newer release is available
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Print the release notes of a newer release
    #[arg(long)]
    pub notes: bool,
}

/// Print whether a newer release exists, without installing anything.
pub async fn execute(args: CheckArgs, config_path: Option<PathBuf>) -> Result<()> {
    let engine = load_engine(config_path, true).await?;
    let current = engine.current_version();

    println!("{}", "Checking for updates...".cyan());
    match engine.check_for_update().await? {
        Some(release) => {
            println!(
                "{}",
                format!("Update available: {} -> {}", current, release.version()).green()
            );
            if release.is_source_archive {
                println!("{}", "The release has no packaged asset; the source archive will be used.".yellow());
            }
            if args.notes && !release.notes.trim().is_empty() {
                println!("\n{}\n", release.notes.trim());
            }
            println!("Run `hotswap update` to install it");
        }
        None => {
            println!("{}", format!("You are on the latest version ({current})").green());
        }
    }

    Ok(())
}
