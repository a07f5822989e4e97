use serde::{Deserialize, Serialize};

/// Timing and retention settings for the update flow.
///
/// Lives under `[upgrade]` in the engine configuration file:
///
/// ```toml
/// [upgrade]
/// check_on_startup = false
/// check_interval = 86400
/// settle_delay_ms = 1500
/// backup_retention = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpgradeConfig {
    /// Whether the host checks for updates right after the startup guard, see
    /// `UpdateEngine::startup_check`. Subject to `check_interval` like any poll.
    #[serde(default = "default_check_on_startup")]
    pub check_on_startup: bool,

    /// Minimum seconds between background update polls. `0` disables polling.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Milliseconds to wait after closing the main window before overwriting files.
    ///
    /// Window close is asynchronous relative to the OS releasing file handles.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Number of backup archives to keep. `0` keeps every backup.
    #[serde(default)]
    pub backup_retention: usize,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            check_on_startup: default_check_on_startup(),
            check_interval: default_check_interval(),
            settle_delay_ms: default_settle_delay_ms(),
            backup_retention: 0,
        }
    }
}

fn default_check_on_startup() -> bool {
    false
}

fn default_check_interval() -> u64 {
    86400 // 24 hours
}

fn default_settle_delay_ms() -> u64 {
    1500
}

impl UpgradeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether background polling is enabled at all.
    #[must_use]
    pub const fn polling_enabled(&self) -> bool {
        self.check_interval > 0
    }
}
