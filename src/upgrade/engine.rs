//! The update, restore and startup-repair flows.
//!
//! [`UpdateEngine`] wires the components together and walks an [`UpdateContext`]
//! through the update state machine:
//!
//! ```text
//! Idle -> CheckingForUpdate -> NoUpdate*
//!                           -> UpdateOffered -> Declined*
//!                                            -> Downloading -> DownloadFailed*
//!                                                           -> Extracting -> ExtractFailed*
//!                                                                         -> Locating -> NotFound*
//!                                                                                     -> Declined*
//!                                                                                     -> BackingUp -> BackupFailed*
//!                                                                                                  -> ReleasingResources
//!                                                                                                  -> Merging -> MergeFailed*
//!                                                                                                             -> Relaunching*
//! ```
//!
//! Only `Merging` writes to the installation directory, and only after `BackingUp`
//! produced a backup. Restoring a backup takes the same path from `Extracting`
//! onwards, snapshotting the current state first. One operation runs at a time; a
//! second one fails with [`UpdateError::AlreadyInProgress`].

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::UpdateError;
use crate::upgrade::archive::extract_archive;
use crate::upgrade::backup::{BackupManager, BackupRecord};
use crate::upgrade::cache::{ArchiveCache, ArchiveFetcher, CachedArchive};
use crate::upgrade::interaction::{AutoConfirm, Interaction};
use crate::upgrade::locator::{LocateOutcome, PayloadIndicators, PayloadLocator};
use crate::upgrade::marker::{ConfigStore, FileConfigStore};
use crate::upgrade::merge::{FileCopier, InstallMerger, MergeReport, MergeRules};
use crate::upgrade::relaunch::{LaunchTarget, Launcher, ProcessLauncher, RelaunchCoordinator};
use crate::upgrade::release::{ReleaseClient, ReleaseInfo};
use crate::upgrade::release_handles::{HostHandles, NoopHost, ResourceReleaseCoordinator};
use crate::upgrade::repair::{RepairReport, RepairService};
use crate::upgrade::version_check::{
    InstallationState, VersionCheckCache, VersionProbe, is_update_available,
};

/// File in the cache directory remembering the last background check.
const VERSION_CHECK_FILE: &str = "version_check.json";

/// States of the update flow. Starred states in the module docs are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpdateState {
    Idle,
    CheckingForUpdate,
    NoUpdate,
    UpdateOffered,
    Declined,
    Downloading,
    DownloadFailed,
    Extracting,
    ExtractFailed,
    Locating,
    NotFound,
    BackingUp,
    BackupFailed,
    ReleasingResources,
    Merging,
    MergeFailed,
    Relaunching,
}

impl UpdateState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::NoUpdate
                | Self::Declined
                | Self::DownloadFailed
                | Self::ExtractFailed
                | Self::NotFound
                | Self::BackupFailed
                | Self::MergeFailed
                | Self::Relaunching
        )
    }

    /// Whether `next` may follow `self`. Covers both the update flow and the
    /// restore flow (`Idle -> Extracting`, `Extracting -> BackingUp`).
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use UpdateState::{
            BackingUp, BackupFailed, CheckingForUpdate, Declined, DownloadFailed, Downloading,
            ExtractFailed, Extracting, Idle, Locating, Merging, MergeFailed, NoUpdate, NotFound,
            Relaunching, ReleasingResources, UpdateOffered,
        };
        matches!(
            (self, next),
            (Idle, CheckingForUpdate | UpdateOffered | Extracting | Declined)
                | (CheckingForUpdate, NoUpdate | UpdateOffered)
                | (UpdateOffered, Declined | Downloading)
                | (Downloading, DownloadFailed | Extracting)
                | (Extracting, ExtractFailed | Locating | BackingUp)
                | (Locating, NotFound | Declined | BackingUp)
                | (BackingUp, BackupFailed | ReleasingResources)
                | (ReleasingResources, Merging)
                | (Merging, MergeFailed | Relaunching)
        )
    }
}

/// Everything one update or restore operation knows, owned by the caller.
#[derive(Debug)]
pub struct UpdateContext {
    state: UpdateState,
    history: Vec<UpdateState>,
    pub release: Option<ReleaseInfo>,
    pub archive: Option<CachedArchive>,
    pub payload_root: Option<PathBuf>,
    pub backup: Option<BackupRecord>,
    pub report: Option<MergeReport>,
    /// Message of the error that ended the operation, if any.
    pub error: Option<String>,
    extraction: Option<TempDir>,
}

impl Default for UpdateContext {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateContext {
    /// A context in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            history: vec![UpdateState::Idle],
            release: None,
            archive: None,
            payload_root: None,
            backup: None,
            report: None,
            error: None,
            extraction: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> UpdateState {
        self.state
    }

    /// Every state visited, starting with `Idle`.
    #[must_use]
    pub fn history(&self) -> &[UpdateState] {
        &self.history
    }

    fn transition(&mut self, next: UpdateState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Update state: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }
}

/// Clears the in-progress flag when the operation ends, however it ends.
struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs the update, restore and repair flows for one installation.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_updater::config::EngineConfig;
/// use hotswap_updater::upgrade::{UpdateContext, UpdateEngine, UpdateState};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = EngineConfig::new("acme/widget", "/opt/widget", "Widget.exe");
/// let engine = UpdateEngine::new(config)?;
///
/// engine.startup_guard().await?;
/// let mut ctx = UpdateContext::new();
/// engine.run_update(&mut ctx, None, false).await?;
/// if ctx.state() == UpdateState::NoUpdate {
///     println!("Already on {}", engine.current_version());
/// }
/// # Ok(())
/// # }
/// ```
pub struct UpdateEngine {
    config: EngineConfig,
    store: Arc<dyn ConfigStore>,
    host: Arc<dyn HostHandles>,
    interaction: Arc<dyn Interaction>,
    probe: VersionProbe,
    client: ReleaseClient,
    fetcher: ArchiveFetcher,
    cache: ArchiveCache,
    locator: PayloadLocator,
    backups: BackupManager,
    releaser: ResourceReleaseCoordinator,
    merge_rules: MergeRules,
    merger: InstallMerger,
    relauncher: RelaunchCoordinator,
    in_progress: AtomicBool,
}

impl UpdateEngine {
    /// Engine for `config` with the file marker store, no host handles, automatic
    /// confirmation and the real process launcher. Swap any of them with the
    /// `with_*` methods.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let merge_rules = MergeRules::from_settings(&config.merge)?;

        Ok(Self {
            store: Arc::new(FileConfigStore::new(
                config.marker_store_path(),
                config.marker.key_path.clone(),
            )),
            host: Arc::new(NoopHost),
            interaction: Arc::new(AutoConfirm::yes()),
            probe: VersionProbe::new(&config.install.install_dir, &config.install.version_file),
            client: ReleaseClient::new(&config.release)?,
            fetcher: ArchiveFetcher::new(&config.release)?,
            cache: ArchiveCache::new(config.cache_dir()),
            locator: PayloadLocator::new(PayloadIndicators::from_settings(&config.install)),
            backups: BackupManager::new(config.backup_dir())
                .with_skipped_paths(vec![config.cache_dir()]),
            releaser: ResourceReleaseCoordinator::new(Duration::from_millis(
                config.upgrade.settle_delay_ms,
            )),
            merger: InstallMerger::new(merge_rules.clone()),
            merge_rules,
            relauncher: RelaunchCoordinator::new(Box::new(ProcessLauncher)),
            in_progress: AtomicBool::new(false),
            config,
        })
    }

    /// Persist the version marker in `store` instead of the marker file.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = store;
        self
    }

    /// Let the engine close the host's windows and handles before merging.
    #[must_use]
    pub fn with_host(mut self, host: Arc<dyn HostHandles>) -> Self {
        self.host = host;
        self
    }

    /// Route prompts, progress and warnings through `interaction`.
    #[must_use]
    pub fn with_interaction(mut self, interaction: Arc<dyn Interaction>) -> Self {
        self.interaction = interaction;
        self
    }

    /// Start the new process with `launcher`. Tests use this to avoid exiting.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.relauncher = RelaunchCoordinator::new(launcher);
        self
    }

    #[must_use]
    pub fn with_copier(mut self, copier: Box<dyn FileCopier>) -> Self {
        self.merger = InstallMerger::with_copier(self.merge_rules.clone(), copier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Backups of this installation, for listing and manual snapshots.
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    /// Version read from the installation's version file.
    #[must_use]
    pub fn current_version(&self) -> String {
        self.probe.current_version()
    }

    /// Running version next to the recorded marker.
    pub fn installation_state(&self) -> Result<InstallationState> {
        self.probe.state(self.store.as_ref(), &self.config.marker.key)
    }

    /// Whether an update, restore or repair is running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn begin(&self) -> Result<InProgressGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| UpdateError::AlreadyInProgress)?;
        Ok(InProgressGuard {
            flag: &self.in_progress,
        })
    }

    /// Startup guard: restore missing required files, then bring the marker in line
    /// with the installed version.
    ///
    /// An error here means the application cannot start.
    pub async fn startup_guard(&self) -> Result<RepairReport> {
        let _guard = self.begin()?;

        let report = RepairService::new(
            &self.config.install.install_dir,
            &self.config.release.repo,
            &self.probe,
            &self.cache,
            &self.client,
            &self.fetcher,
            &self.locator,
        )
        .ensure(&self.config.install.required_files)
        .await?;

        let current = self.probe.current_version();
        self.probe.reconcile(self.store.as_ref(), &self.config.marker.key, &current)?;
        Ok(report)
    }

    /// Ask the registry for the latest release. `None` when it is not newer than the
    /// installed version.
    pub async fn check_for_update(&self) -> Result<Option<ReleaseInfo>> {
        let current = self.probe.current_version();
        let release = self.client.fetch_latest(&self.config.release.repo).await?;

        let cache = VersionCheckCache::new(current.clone(), release.version().to_string());
        if let Err(e) = cache.save(&self.version_check_path()).await {
            debug!("Failed to save version check: {:#}", e);
        }

        if is_update_available(&current, release.version()) {
            info!("Update available: {} -> {}", current, release.version());
            Ok(Some(release))
        } else {
            info!("Version {} is up to date", current);
            Ok(None)
        }
    }

    /// Low-frequency background poll. Returns the newer version, if any.
    ///
    /// Never fails: network problems mean "no update". Does nothing while another
    /// operation runs, when polling is disabled, or when the last check is younger
    /// than `check_interval`.
    pub async fn poll_for_update(&self) -> Option<String> {
        if !self.config.upgrade.polling_enabled() || self.is_busy() {
            return None;
        }

        let current = self.probe.current_version();
        let path = self.version_check_path();
        if let Ok(Some(cached)) = VersionCheckCache::load(&path).await
            && cached.current_version == current
            && cached.is_valid(self.config.upgrade.check_interval)
        {
            debug!("Using cached version check from {}", cached.checked_at);
            return cached.update_available.then_some(cached.latest_version);
        }

        match self.check_for_update().await {
            Ok(release) => release.map(|r| r.version().to_string()),
            Err(e) => {
                debug!("Background update check failed: {:#}", e);
                None
            }
        }
    }

    /// The update check a host runs once at startup, after [`Self::startup_guard`].
    ///
    /// `None` unless `upgrade.check_on_startup` is set; otherwise the same answer as
    /// [`Self::poll_for_update`].
    pub async fn startup_check(&self) -> Option<String> {
        if !self.config.upgrade.check_on_startup {
            return None;
        }
        self.poll_for_update().await
    }

    /// Interactive update: check, offer, and install the latest release, or the
    /// release tagged `tag`. `force` installs even when the release is not newer.
    pub async fn run_update(&self, ctx: &mut UpdateContext, tag: Option<&str>, force: bool) -> Result<()> {
        let _guard = self.begin()?;

        ctx.transition(UpdateState::CheckingForUpdate);
        self.interaction.progress("Checking for updates...");
        let current = self.probe.current_version();
        let repo = &self.config.release.repo;
        let release = match tag {
            Some(tag) => self.client.fetch_by_tag(repo, tag).await,
            None => self.client.fetch_latest(repo).await,
        };
        self.interaction.progress_done();
        let release = release.inspect_err(|e| ctx.error = Some(format!("{e:#}")))?;

        if !force && !is_update_available(&current, release.version()) {
            info!("Installed version {} is up to date (latest {})", current, release.version());
            ctx.transition(UpdateState::NoUpdate);
            return Ok(());
        }

        ctx.transition(UpdateState::UpdateOffered);
        let mut question =
            format!("Version {} is available (installed: {}).", release.version(), current);
        if !release.notes.trim().is_empty() {
            question.push_str(&format!("\n\n{}\n", release.notes.trim()));
        }
        question.push_str("\nDownload it now?");
        ctx.release = Some(release);

        if !self.interaction.confirm(&question).is_yes() {
            ctx.transition(UpdateState::Declined);
            return Ok(());
        }

        self.install(ctx, &current).await
    }

    /// Install a release that was already selected, skipping the check and the first
    /// prompt.
    pub async fn apply_release(&self, ctx: &mut UpdateContext, release: ReleaseInfo) -> Result<()> {
        let _guard = self.begin()?;
        let current = self.probe.current_version();
        ctx.release = Some(release);
        ctx.transition(UpdateState::UpdateOffered);
        self.install(ctx, &current).await
    }

    async fn install(&self, ctx: &mut UpdateContext, current: &str) -> Result<()> {
        let release = ctx.release.clone().context("No release selected")?;

        ctx.transition(UpdateState::Downloading);
        self.interaction.progress(&format!("Downloading {}...", release.asset_name));
        let archive = self.cache.resolve(&release, &self.fetcher).await;
        self.interaction.progress_done();
        let archive = archive.map_err(|e| self.fail(ctx, UpdateState::DownloadFailed, e))?;

        ctx.transition(UpdateState::Extracting);
        let extraction = self
            .extract(&archive.path)
            .map_err(|e| self.fail(ctx, UpdateState::ExtractFailed, e))?;
        ctx.archive = Some(archive);

        ctx.transition(UpdateState::Locating);
        let payload = match self.locator.locate(extraction.path()) {
            Ok(LocateOutcome::Located {
                root,
                ..
            }) => root,
            Ok(LocateOutcome::NotFound) => {
                let err = UpdateError::PayloadNotFound {
                    root: extraction.path().display().to_string(),
                };
                return Err(self.fail(ctx, UpdateState::NotFound, err.into()));
            }
            Err(e) => return Err(self.fail(ctx, UpdateState::NotFound, e)),
        };
        ctx.payload_root = Some(payload.clone());
        ctx.extraction = Some(extraction);

        let question = format!(
            "Install version {} now? The application will close and restart.",
            release.version()
        );
        if !self.interaction.confirm(&question).is_yes() {
            ctx.transition(UpdateState::Declined);
            return Ok(());
        }

        self.replace_installation(ctx, current, payload, release.version()).await
    }

    /// Restore a backup: the newest one of `version`, or the newest overall.
    pub async fn restore_backup(&self, ctx: &mut UpdateContext, version: Option<&str>) -> Result<()> {
        let _guard = self.begin()?;

        let record = match version {
            Some(version) => self.backups.find(version).await?,
            None => self.backups.latest().await?,
        }
        .ok_or_else(|| UpdateError::BackupNotFound {
            version: version.unwrap_or("any").to_string(),
        })?;

        let question = format!(
            "Restore the backup of version {} taken {}? The application will close and restart.",
            record.source_version,
            record.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if !self.interaction.confirm(&question).is_yes() {
            ctx.transition(UpdateState::Declined);
            return Ok(());
        }

        ctx.transition(UpdateState::Extracting);
        let extraction = self
            .extract(&record.archive_path)
            .map_err(|e| self.fail(ctx, UpdateState::ExtractFailed, e))?;
        let payload = extraction.path().to_path_buf();
        ctx.payload_root = Some(payload.clone());
        ctx.extraction = Some(extraction);

        let current = self.probe.current_version();
        let target_version = record.source_version.clone();
        info!("Restoring version {} from {}", target_version, record.archive_path.display());
        self.replace_installation(ctx, &current, payload, &target_version).await
    }

    /// Backup, release, merge, relaunch. Shared by update and restore.
    async fn replace_installation(
        &self,
        ctx: &mut UpdateContext,
        current: &str,
        payload: PathBuf,
        new_version: &str,
    ) -> Result<()> {
        let install_dir = &self.config.install.install_dir;

        ctx.transition(UpdateState::BackingUp);
        self.interaction.progress(&format!("Backing up version {current}..."));
        let backup = self
            .backups
            .snapshot(install_dir, current, &self.config.backup_exclude())
            .await;
        self.interaction.progress_done();
        let backup = backup.map_err(|e| self.fail(ctx, UpdateState::BackupFailed, e))?;
        ctx.backup = Some(backup.clone());

        if let Err(e) = self.backups.prune(self.config.upgrade.backup_retention).await {
            warn!("Failed to prune old backups: {:#}", e);
        }

        ctx.transition(UpdateState::ReleasingResources);
        self.releaser.release_for_replace(self.host.as_ref()).await;

        ctx.transition(UpdateState::Merging);
        self.interaction.progress(&format!("Installing version {new_version}..."));
        let report = self.merger.apply(&payload, install_dir);
        self.interaction.progress_done();
        let report = report.map_err(|e| self.fail(ctx, UpdateState::MergeFailed, e))?;

        if !report.skipped.is_empty() {
            let skipped: Vec<String> = report
                .skipped
                .iter()
                .map(|s| format!("{} ({})", s.path.display(), s.reason))
                .collect();
            self.interaction.warn(&format!(
                "{} file(s) were kept as they are:\n{}",
                skipped.len(),
                skipped.join("\n")
            ));
        }

        let failures = report.failure_lines();
        ctx.report = Some(report);
        if !failures.is_empty() {
            let err = UpdateError::MergeFailed {
                install_dir: install_dir.display().to_string(),
                failed: failures,
                backup: Some(backup.archive_path.display().to_string()),
            };
            return Err(self.fail(ctx, UpdateState::MergeFailed, err.into()));
        }

        // The extraction directory would outlive a process that exits on relaunch
        ctx.extraction.take();
        ctx.payload_root = None;

        self.interaction.notify(&format!(
            "Version {new_version} installed, restarting. The previous installation \
             (version {current}) is backed up at {}",
            backup.archive_path.display()
        ));

        ctx.transition(UpdateState::Relaunching);
        self.relauncher
            .finish_and_restart(
                self.store.as_ref(),
                &self.config.marker.key,
                new_version,
                &LaunchTarget::from_config(&self.config),
            )
            .inspect_err(|e| ctx.error = Some(format!("{e:#}")))?;
        Ok(())
    }

    fn extract(&self, archive: &Path) -> Result<TempDir> {
        let extraction = TempDir::new().context("Failed to create extraction directory")?;
        self.interaction.progress("Extracting archive...");
        let extracted = extract_archive(archive, extraction.path());
        self.interaction.progress_done();
        extracted?;
        Ok(extraction)
    }

    /// Move `ctx` to the failure state matching `err` and hand the error back.
    fn fail(&self, ctx: &mut UpdateContext, fallback: UpdateState, err: anyhow::Error) -> anyhow::Error {
        let state = err
            .downcast_ref::<UpdateError>()
            .and_then(UpdateError::terminal_state)
            .filter(|state| ctx.state().can_transition_to(*state))
            .unwrap_or(fallback);
        ctx.transition(state);
        ctx.error = Some(format!("{err:#}"));
        self.interaction.warn(&format!("{err:#}"));
        err
    }

    fn version_check_path(&self) -> PathBuf {
        self.cache.dir().join(VERSION_CHECK_FILE)
    }
}
