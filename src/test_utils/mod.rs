//! Test utilities for hotswap
//!
//! Helpers shared by unit tests and the integration suite:
//! - file tree and ZIP fixtures ([`write_tree`], [`write_zip`], [`list_files`])
//! - a local HTTP server standing in for the release registry ([`StaticServer`])
//! - recording fakes for the engine's seams ([`RecordingInteraction`],
//!   [`RecordingLauncher`])
//!
//! Nothing here reaches the network; the HTTP server binds to `127.0.0.1`.
//!
//! # Example
//!
//! ```rust,no_run
//! use hotswap_updater::test_utils::{list_files, write_tree};
//!
//! let temp = tempfile::TempDir::new().unwrap();
//! write_tree(temp.path(), &[("Widget.exe", "bin"), ("config/defaults.ini", "a=1")]).unwrap();
//! assert_eq!(list_files(temp.path()), vec!["Widget.exe", "config/defaults.ini"]);
//! ```

pub mod fakes;
pub mod fixtures;
pub mod http;

pub use fakes::{RecordingInteraction, RecordingLauncher};
pub use fixtures::{list_files, write_tree, write_zip};
pub use http::StaticServer;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` when given, otherwise `RUST_LOG`;
/// with neither, tests stay silent.
///
/// ```bash
/// RUST_LOG=hotswap_updater=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
