//! Progress indicators for long-running engine steps.
//!
//! Thin wrappers around `indicatif` so every step (download, extraction, backup
//! compression) looks the same. Indicators render hidden when
//! `HOTSWAP_NO_PROGRESS` is set, which keeps scripted runs and tests quiet.
//!
//! ```rust
//! use hotswap_updater::utils::progress::ProgressBar;
//!
//! let spinner = ProgressBar::new_spinner();
//! spinner.set_message("Extracting archive...");
//! spinner.finish_and_clear();
//! ```

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::time::Duration;

fn is_progress_disabled() -> bool {
    std::env::var("HOTSWAP_NO_PROGRESS").is_ok()
}

/// A progress bar or spinner. Cloning shares the same underlying indicator.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Spinner for work of unknown length.
    pub fn new_spinner() -> Self {
        let bar = if is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        };
        Self {
            inner: bar,
        }
    }

    /// Byte-counting bar for downloads. `len` of 0 means the size is unknown yet.
    pub fn new_download(len: u64) -> Self {
        let bar = if is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(len);
            bar.set_style(download_style());
            bar
        };
        Self {
            inner: bar,
        }
    }

    /// A bar that never renders.
    pub fn hidden() -> Self {
        Self {
            inner: IndicatifBar::hidden(),
        }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.inner.set_prefix(prefix.into());
    }

    pub fn set_length(&self, len: u64) {
        self.inner.set_length(len);
    }

    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.inner.finish_with_message(msg.into());
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn spinner_style() -> IndicatifStyle {
    IndicatifStyle::default_spinner()
        .template("{prefix:.bold} {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

fn download_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("━╸━")
}
