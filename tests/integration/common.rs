//! Shared fixture: an installed application plus its cache, wired to recording fakes.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use hotswap_updater::config::EngineConfig;
use hotswap_updater::test_utils::{
    RecordingInteraction, RecordingLauncher, init_test_logging, write_tree, write_zip,
};
use hotswap_updater::upgrade::{Confirmation, MemoryConfigStore, ReleaseInfo, UpdateEngine};
use tempfile::TempDir;

/// Refused port used when a test must not reach any registry.
pub const UNREACHABLE: &str = "http://127.0.0.1:9";

pub const MARKER_KEY: &str = "DisplayVersion";

pub struct Installation {
    pub temp: TempDir,
    pub store: Arc<MemoryConfigStore>,
    pub launcher: RecordingLauncher,
    pub config: EngineConfig,
}

impl Installation {
    /// `Widget.exe` at `version`, with a `config` directory holding a user icon and
    /// a `modules` directory.
    pub fn new(version: &str) -> Self {
        init_test_logging(None);
        let temp = TempDir::new().unwrap();
        let install_dir = temp.path().join("install");
        let (version_file, exe, core) =
            (format!("{version}\n"), format!("widget {version}"), format!("core {version}"));
        write_tree(
            &install_dir,
            &[
                ("VERSION", version_file.as_str()),
                ("Widget.exe", exe.as_str()),
                ("config/defaults.ini", "theme=light"),
                ("config/user.ico", "my icon"),
                ("modules/core.dll", core.as_str()),
            ],
        )
        .unwrap();

        let mut config = EngineConfig::new("acme/widget", &install_dir, "Widget.exe");
        config.install.cache_dir = Some(temp.path().join("cache"));
        config.install.product_name = "Widget".to_string();
        config.release.api_base = UNREACHABLE.to_string();
        config.release.web_base = UNREACHABLE.to_string();
        config.release.timeout_secs = 5;
        config.upgrade.settle_delay_ms = 0;

        Self {
            temp,
            store: Arc::new(MemoryConfigStore::with_value(MARKER_KEY, version)),
            launcher: RecordingLauncher::default(),
            config,
        }
    }

    pub fn install_dir(&self) -> PathBuf {
        self.temp.path().join("install")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.config.cache_dir()
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.install_dir().join(relative)).unwrap()
    }

    pub fn marker(&self) -> Option<String> {
        use hotswap_updater::upgrade::ConfigStore;
        self.store.get(MARKER_KEY).unwrap()
    }

    /// Engine answering prompts from `answers`.
    pub fn engine(&self, answers: Vec<Confirmation>) -> (UpdateEngine, Arc<RecordingInteraction>) {
        let interaction = Arc::new(RecordingInteraction::answering(answers));
        let engine = UpdateEngine::new(self.config.clone())
            .unwrap()
            .with_store(self.store.clone())
            .with_interaction(interaction.clone())
            .with_launcher(Box::new(self.launcher.clone()));
        (engine, interaction)
    }

    /// Put `App-{version}.zip` in the cache and describe it as a release.
    pub fn cache_release(&self, version: &str, files: &[(&str, &str)]) -> ReleaseInfo {
        let name = format!("App-{version}.zip");
        write_zip(&self.cache_dir().join(&name), files).unwrap();
        ReleaseInfo {
            tag: format!("v{version}"),
            asset_name: name,
            download_url: format!("{UNREACHABLE}/App-{version}.zip"),
            notes: String::new(),
            is_prerelease: false,
            is_source_archive: false,
        }
    }
}

/// Payload files for `version`, nested under `root/` as release archives usually are.
pub fn payload(root: &str, version: &str) -> Vec<(String, String)> {
    vec![
        (format!("{root}/VERSION"), version.to_string()),
        (format!("{root}/Widget.exe"), format!("widget {version}")),
        (format!("{root}/config/defaults.ini"), "theme=dark".to_string()),
        (format!("{root}/config/user.ico"), "stock icon".to_string()),
        (format!("{root}/modules/core.dll"), format!("core {version}")),
    ]
}

pub fn as_refs(files: &[(String, String)]) -> Vec<(&str, &str)> {
    files.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect()
}
