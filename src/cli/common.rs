//! Pieces shared by the commands: engine construction and the terminal
//! implementation of [`Interaction`].

use anyhow::Result;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::EngineConfig;
use crate::upgrade::{Confirmation, Interaction, UpdateEngine};
use crate::utils::progress::ProgressBar;

/// Load the configuration and build an engine that talks to the terminal.
///
/// With `assume_yes` every prompt is shown and answered yes without waiting for
/// input.
pub async fn load_engine(config_path: Option<PathBuf>, assume_yes: bool) -> Result<UpdateEngine> {
    let config = EngineConfig::load(config_path).await?;
    let interaction: Arc<dyn Interaction> = Arc::new(ConsoleInteraction::new(assume_yes));
    Ok(UpdateEngine::new(config)?.with_interaction(interaction))
}

/// Prompts on stdin, shows progress as a spinner, prints warnings in yellow.
#[derive(Default)]
pub struct ConsoleInteraction {
    spinner: Mutex<Option<ProgressBar>>,
    assume_yes: bool,
}

impl ConsoleInteraction {
    #[must_use]
    pub fn new(assume_yes: bool) -> Self {
        Self {
            spinner: Mutex::new(None),
            assume_yes,
        }
    }
}

impl Interaction for ConsoleInteraction {
    fn confirm(&self, message: &str) -> Confirmation {
        self.progress_done();
        if self.assume_yes {
            println!("{}\n{}", message, "yes (--yes)".dimmed());
            return Confirmation::Yes;
        }
        print!("{}\n{} ", message, "[y]es / [n]o / [c]ancel:".bold());
        if io::stdout().flush().is_err() {
            return Confirmation::Cancel;
        }

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => Confirmation::Cancel,
            Ok(_) => parse_answer(&line),
        }
    }

    fn progress(&self, message: &str) {
        if let Ok(mut spinner) = self.spinner.lock() {
            let bar = spinner.get_or_insert_with(ProgressBar::new_spinner);
            bar.set_message(message.to_string());
        }
    }

    fn progress_done(&self) {
        if let Ok(mut spinner) = self.spinner.lock()
            && let Some(bar) = spinner.take()
        {
            bar.finish_and_clear();
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("{} {}", "warning:".yellow().bold(), message);
    }

    fn notify(&self, message: &str) {
        self.progress_done();
        println!("{}", message.green());
    }
}

/// Anything that is not a clear yes or no cancels.
fn parse_answer(line: &str) -> Confirmation {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Confirmation::Yes,
        "n" | "no" => Confirmation::No,
        _ => Confirmation::Cancel,
    }
}
