//! hotswap CLI entry point
//!
//! Parses arguments, installs the log subscriber, runs one command and renders
//! failures through [`user_friendly_error`].

use anyhow::Result;
use clap::Parser;
use hotswap_updater::cli;
use hotswap_updater::core::error::user_friendly_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = cli.build_config();

    // RUST_LOG wins over the command-line level
    let filter = match (std::env::var("RUST_LOG"), config.log_level.as_deref()) {
        (Ok(_), _) => EnvFilter::from_default_env(),
        (Err(_), Some(level)) => EnvFilter::new(format!("hotswap_updater={level}")),
        (Err(_), None) => EnvFilter::new("error"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute_with_config(config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
