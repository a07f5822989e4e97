//! Releasing OS handles the running application holds on its own installation.
//!
//! Before the merger overwrites anything, the host application has to let go of the
//! files it has open: image and icon handles first, then transient windows, then a
//! collection pass to finalise anything unreferenced, then the main window (which
//! runs the application's shutdown hooks). A short settle delay lets the OS drop the
//! handles. The order matters; later steps free less once earlier ones are skipped.

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Host-side operations that free file handles. Implemented by the embedding
/// application; the CLI uses [`NoopHost`].
pub trait HostHandles: Send + Sync {
    fn clear_image_handles(&self) -> Result<()>;
    fn close_transient_windows(&self) -> Result<()>;
    fn collect_garbage(&self) -> Result<()>;
    fn close_main_window(&self) -> Result<()>;
}

/// Host with nothing to release, such as a separate updater process.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostHandles for NoopHost {
    fn clear_image_handles(&self) -> Result<()> {
        Ok(())
    }

    fn close_transient_windows(&self) -> Result<()> {
        Ok(())
    }

    fn collect_garbage(&self) -> Result<()> {
        Ok(())
    }

    fn close_main_window(&self) -> Result<()> {
        Ok(())
    }
}

/// Drives [`HostHandles`] before files are overwritten.
///
/// `settle_delay` is waited after the main window closes because the OS releases
/// file handles some time after the window is gone.
pub struct ResourceReleaseCoordinator {
    settle_delay: Duration,
}

impl ResourceReleaseCoordinator {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
        }
    }

    /// Run every release step in order, then wait out the settle delay.
    ///
    /// A failing step is logged and skipped; the merge tolerates files that stay
    /// locked. Returns the number of steps that failed.
    pub async fn release_for_replace(&self, host: &dyn HostHandles) -> usize {
        info!("Releasing resources held by the running application");
        let failures = run_steps(host);

        if !self.settle_delay.is_zero() {
            debug!("Waiting {:?} for handles to settle", self.settle_delay);
            tokio::time::sleep(self.settle_delay).await;
        }
        failures
    }
}

fn run_steps(host: &dyn HostHandles) -> usize {
    let steps: [(&str, &dyn Fn() -> Result<()>); 4] = [
        ("clear image handles", &|| host.clear_image_handles()),
        ("close transient windows", &|| host.close_transient_windows()),
        ("collect garbage", &|| host.collect_garbage()),
        ("close main window", &|| host.close_main_window()),
    ];

    let mut failures = 0;
    for (name, step) in steps {
        match step() {
            Ok(()) => debug!("Release step done: {}", name),
            Err(e) => {
                warn!("Release step '{}' failed: {:#}", name, e);
                failures += 1;
            }
        }
    }
    failures
}
