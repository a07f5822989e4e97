//! Self-update, repair and backup/restore engine.
//!
//! Components, leaf first:
//!
//! - [`version_check`]: installed version, version ordering, marker reconciliation
//! - [`release`]: release registry queries and asset selection
//! - [`cache`]: local archive cache and downloads
//! - [`archive`]: ZIP validation, extraction and compression
//! - [`locator`]: finding the payload inside an extracted release
//! - [`backup`]: snapshots of the installation
//! - [`release_handles`]: making the running application let go of its files
//! - [`merge`]: copying a payload into the live installation
//! - [`relaunch`]: marker update and process handover
//! - [`repair`]: restoring missing required files at startup
//! - [`engine`]: the flows tying them together
//!
//! # Example
//!
//! ```rust,no_run
//! use hotswap_updater::config::EngineConfig;
//! use hotswap_updater::upgrade::{UpdateContext, UpdateEngine};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::load(None).await?;
//! let engine = UpdateEngine::new(config)?;
//!
//! engine.startup_guard().await?;
//!
//! let mut ctx = UpdateContext::new();
//! engine.run_update(&mut ctx, None, false).await?;
//! println!("Finished in state {:?}", ctx.state());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod backup;
pub mod cache;
pub mod config;
pub mod engine;
pub mod interaction;
pub mod locator;
pub mod marker;
pub mod merge;
pub mod relaunch;
pub mod release;
pub mod release_handles;
pub mod repair;
pub mod version_check;

pub use backup::{BackupManager, BackupRecord};
pub use cache::{ArchiveCache, ArchiveFetcher, CachedArchive};
pub use engine::{UpdateContext, UpdateEngine, UpdateState};
pub use interaction::{AutoConfirm, Confirmation, Interaction};
pub use locator::{LocateOutcome, PayloadLocator};
pub use marker::{ConfigStore, FileConfigStore, MemoryConfigStore};
pub use merge::{FileCopier, FsCopier, InstallMerger, MergeReport, MergeRule};
pub use relaunch::{LaunchTarget, Launcher, ProcessLauncher};
pub use release::{ReleaseClient, ReleaseInfo};
pub use release_handles::{HostHandles, NoopHost};
pub use repair::{RepairReport, RepairService};
pub use version_check::{VersionProbe, is_update_available};
