//! Handing over to the freshly installed version.
//!
//! Writing the marker, starting the new process and ending the current one happen in
//! that order. Once the new process is started nothing can be undone.

use anyhow::Result;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::UpdateError;
use crate::upgrade::marker::ConfigStore;

/// Flag that keeps a portable installation portable across a relaunch.
pub const PORTABLE_FLAG: &str = "--portable";

/// What to start after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub portable: bool,
}

impl LaunchTarget {
    /// The configured entry program, started in the installation directory.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.launch_program(),
            args: config.install.launch.args.clone(),
            working_dir: Some(config.install.install_dir.clone()),
            portable: config.install.launch.portable,
        }
    }

    /// Arguments passed to the new process, with the portable flag appended once.
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if self.portable && !args.iter().any(|a| a == PORTABLE_FLAG) {
            args.push(PORTABLE_FLAG.to_string());
        }
        args
    }
}

/// Starts processes and ends the current one.
pub trait Launcher: Send + Sync {
    /// Start `target` detached from this process and return its process id.
    fn spawn_detached(&self, target: &LaunchTarget) -> Result<u32>;

    /// End the current process. Implementations used outside tests do not return.
    fn terminate(&self);
}

/// [`Launcher`] backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn spawn_detached(&self, target: &LaunchTarget) -> Result<u32> {
        let mut command = Command::new(&target.program);
        command
            .args(target.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &target.working_dir {
            command.current_dir(dir);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn()?;
        Ok(child.id())
    }

    fn terminate(&self) {
        std::process::exit(0);
    }
}

/// Records the new version, starts the application again and ends this process.
pub struct RelaunchCoordinator {
    launcher: Box<dyn Launcher>,
}

impl RelaunchCoordinator {
    pub fn new(launcher: Box<dyn Launcher>) -> Self {
        Self {
            launcher,
        }
    }

    /// Record `new_version` in the marker, start `target` and end this process.
    ///
    /// The marker write is best-effort; the next startup reconciles it anyway. A
    /// process that fails to start is a [`UpdateError::RelaunchFailed`], with the
    /// marker already written.
    pub fn finish_and_restart(
        &self,
        store: &dyn ConfigStore,
        marker_key: &str,
        new_version: &str,
        target: &LaunchTarget,
    ) -> Result<u32> {
        if let Err(e) = store.set(marker_key, new_version) {
            warn!("Failed to record version {} in the marker: {:#}", new_version, e);
        }

        let pid = self.launcher.spawn_detached(target).map_err(|e| UpdateError::RelaunchFailed {
            program: target.program.display().to_string(),
            reason: format!("{e:#}"),
        })?;

        info!("Started {} (pid {}), exiting", target.program.display(), pid);
        self.launcher.terminate();
        Ok(pid)
    }
}
