//! `hotswap update`: the interactive update flow.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

use super::common::load_engine;
use crate::upgrade::{UpdateContext, UpdateState};

/// Install the latest release, or a specific tag
#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Release tag to install instead of the latest (e.g. `v2.1.0`)
    pub tag: Option<String>,

    /// Answer yes to every prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Install even when the release is not newer than the installed version
    #[arg(short, long)]
    pub force: bool,
}

/// Run the update flow. Only returns on its own when nothing was installed; a
/// successful install ends with the relaunch.
pub async fn execute(args: UpdateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let engine = load_engine(config_path, args.yes).await?;
    let mut ctx = UpdateContext::new();

    let target = args.tag.as_deref().map_or_else(
        || "Updating to the latest release...".to_string(),
        |tag| format!("Updating to {tag}..."),
    );
    println!("{}", target.cyan());

    let result = engine.run_update(&mut ctx, args.tag.as_deref(), args.force).await;

    // On success the engine already reported the backup and the process was replaced
    if let Err(e) = result {
        if let Some(backup) = &ctx.backup {
            eprintln!("Backup of the previous installation: {}", backup.archive_path.display());
        }
        return Err(e);
    }

    match ctx.state() {
        UpdateState::NoUpdate => println!(
            "{}",
            format!("Already on the latest version ({})", engine.current_version()).green()
        ),
        UpdateState::Declined => println!("{}", "Update cancelled".yellow()),
        _ => {}
    }

    Ok(())
}
