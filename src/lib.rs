//! hotswap - self-update, repair and backup/restore for desktop applications
//!
//! Keeps an installed application current from a GitHub-style release feed while
//! the application itself is running. An update downloads a release archive,
//! finds the payload inside it, snapshots the live installation, makes the running
//! process let go of its files, merges the payload in place and relaunches.
//!
//! # Architecture Overview
//!
//! The engine is a set of small components driven by [`upgrade::UpdateEngine`]:
//!
//! ```text
//! check ─► download/cache ─► extract ─► locate payload ─► confirm
//!       ─► backup ─► release handles ─► merge ─► marker + relaunch
//! ```
//!
//! Every operation threads an [`upgrade::UpdateContext`] through the flow and
//! records each state it passes. Host-specific behaviour sits behind traits
//! ([`upgrade::Interaction`], [`upgrade::HostHandles`], [`upgrade::Launcher`],
//! [`upgrade::ConfigStore`], [`upgrade::FileCopier`]) so a GUI host, the CLI and the
//! tests plug in their own.
//!
//! # Core Modules
//!
//! - [`cli`] - Command-line interface (`check`, `update`, `restore`, `repair`, `status`)
//! - [`config`] - Engine configuration file (`hotswap.toml`)
//! - [`core`] - Error taxonomy and user-facing error rendering
//! - [`upgrade`] - The update, repair and backup/restore engine
//! - [`utils`] - File system helpers and progress indicators
//!
//! # Configuration Example
//!
//! ```toml
//! [release]
//! repo = "acme/widget-settings"
//! asset_patterns = ["Widget-Settings-*.zip", "*.zip"]
//!
//! [install]
//! install_dir = "/opt/widget-settings"
//! entry_file = "WidgetSettings.exe"
//! product_name = "Widget Settings"
//! required_files = ["WidgetSettings.exe", "config/defaults.ini"]
//!
//! [merge.rules]
//! config = "additive-merge"
//! modules = "full-replace"
//!
//! [upgrade]
//! check_interval = 86400
//! backup_retention = 5
//! ```
//!
//! # Cache Layout
//!
//! ```text
//! {cache_dir}/
//! ├── Widget-Settings-2.1.0.zip       # downloaded release archives
//! ├── version_check.json              # last background check
//! └── backups/
//!     └── 2.0.3_20260114-093015.zip   # {version}_{timestamp}
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
