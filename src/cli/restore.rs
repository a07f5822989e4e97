//! `hotswap restore`

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use super::common::load_engine;
use crate::upgrade::{BackupManager, UpdateContext, UpdateState};

/// Restore the installation from a backup
#[derive(Parser, Debug)]
pub struct RestoreArgs {
    /// Version whose newest backup to restore; the newest backup overall if omitted
    pub version: Option<String>,

    /// List available backups instead of restoring
    #[arg(short, long)]
    pub list: bool,

    /// Answer yes to every prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// List backups, or restore one and relaunch.
pub async fn execute(args: RestoreArgs, config_path: Option<PathBuf>) -> Result<()> {
    let engine = load_engine(config_path, args.yes).await?;

    if args.list {
        return list_backups(engine.backups()).await;
    }

    let mut ctx = UpdateContext::new();
    engine.restore_backup(&mut ctx, args.version.as_deref()).await?;

    if ctx.state() == UpdateState::Declined {
        println!("{}", "Restore cancelled".yellow());
    }
    Ok(())
}

async fn list_backups(backups: &BackupManager) -> Result<()> {
    let records = backups.list().await?;
    if records.is_empty() {
        println!("No backups in {}", backups.backup_dir().display());
        return Ok(());
    }

    println!("{}", "Available backups (newest first):".bold());
    for record in records {
        println!(
            "  {:<16} {}  {}",
            record.source_version.cyan(),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.archive_path.display()
        );
    }
    Ok(())
}
