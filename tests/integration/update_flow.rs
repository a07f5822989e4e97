//! Complete update runs: registry metadata, cache, merge, marker and relaunch.

use std::io;
use std::path::Path;

use hotswap_updater::core::UpdateError;
use hotswap_updater::test_utils::{StaticServer, list_files, write_zip};
use hotswap_updater::upgrade::archive::extract_archive;
use hotswap_updater::upgrade::{
    Confirmation, FileCopier, FsCopier, UpdateContext, UpdateState,
};
use serde_json::json;
use tempfile::TempDir;

use crate::common::{Installation, as_refs, payload};

fn latest_release(tag: &str, assets: serde_json::Value) -> serde_json::Value {
    json!({
        "tag_name": tag,
        "body": "Bug fixes",
        "prerelease": false,
        "draft": false,
        "assets": assets,
    })
}

#[tokio::test]
async fn test_update_from_1_9_0_to_1_9_1_with_cached_archive() {
    let inst = Installation::new("1.9.0");
    let files = payload("App", "1.9.1");
    inst.cache_release("1.9.1", &as_refs(&files));

    let server = StaticServer::start().await.unwrap().with_json(
        "/repos/acme/widget/releases/latest",
        &latest_release(
            "v1.9.1",
            json!([{ "name": "App-1.9.1.zip", "browser_download_url": "http://127.0.0.1:9/App-1.9.1.zip" }]),
        ),
    );
    let mut inst = inst;
    inst.config.release.api_base = server.base_url();

    let (engine, interaction) = inst.engine(vec![Confirmation::Yes, Confirmation::Yes]);
    let mut ctx = UpdateContext::new();
    engine.run_update(&mut ctx, None, false).await.unwrap();

    assert_eq!(ctx.state(), UpdateState::Relaunching);
    assert_eq!(interaction.prompts().len(), 2);
    assert!(interaction.prompts()[0].contains("Bug fixes"));

    // Served from the cache, never downloaded
    assert_eq!(server.requests(), vec!["/repos/acme/widget/releases/latest".to_string()]);

    assert_eq!(inst.marker().as_deref(), Some("1.9.1"));
    assert_eq!(engine.current_version(), "1.9.1");
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.1");
    assert_eq!(inst.read("modules/core.dll"), "core 1.9.1");
    assert_eq!(inst.read("config/defaults.ini"), "theme=dark");
    assert_eq!(inst.read("config/user.ico"), "my icon");

    let backups = engine.backups().list().await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].source_version, "1.9.0");
    assert_eq!(ctx.backup.as_ref().map(|b| b.source_version.as_str()), Some("1.9.0"));

    let started = inst.launcher.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].program, inst.install_dir().join("Widget.exe"));
    assert!(inst.launcher.terminated());
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn test_release_without_assets_uses_source_archive() {
    let mut inst = Installation::new("1.9.0");
    let staging = TempDir::new().unwrap();
    let archive = staging.path().join("source.zip");
    let files = payload("widget-2.0.0", "2.0.0");
    write_zip(&archive, &as_refs(&files)).unwrap();

    let source_path = "/acme/widget/archive/refs/tags/v2.0.0.zip";
    let server = StaticServer::start()
        .await
        .unwrap()
        .with_json("/repos/acme/widget/releases/latest", &latest_release("v2.0.0", json!([])))
        .with_file(source_path, std::fs::read(&archive).unwrap());
    inst.config.release.api_base = server.base_url();
    inst.config.release.web_base = server.base_url();

    let (engine, _) = inst.engine(vec![Confirmation::Yes, Confirmation::Yes]);

    let release = engine.check_for_update().await.unwrap().expect("2.0.0 is newer");
    assert!(release.is_source_archive);
    assert_eq!(release.download_url, server.url(source_path));
    assert_eq!(release.asset_name, "widget-2.0.0.zip");

    let mut ctx = UpdateContext::new();
    engine.run_update(&mut ctx, None, false).await.unwrap();

    assert_eq!(ctx.state(), UpdateState::Relaunching);
    assert!(server.requests().contains(&source_path.to_string()));
    assert!(inst.cache_dir().join("widget-2.0.0.zip").is_file());
    assert_eq!(inst.marker().as_deref(), Some("2.0.0"));
    assert_eq!(inst.read("Widget.exe"), "widget 2.0.0");
}

/// Fails every operation touching `busy` the way a file held open by the running
/// application does.
struct BusyCopier {
    busy: &'static str,
}

impl BusyCopier {
    fn touches_busy(&self, path: &Path) -> bool {
        walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name() == self.busy)
    }
}

impl FileCopier for BusyCopier {
    fn copy_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        if dst.file_name().is_some_and(|n| n == self.busy) {
            return Err(io::Error::from(io::ErrorKind::ResourceBusy));
        }
        FsCopier.copy_file(src, dst)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        if self.touches_busy(path) {
            return Err(io::Error::from(io::ErrorKind::ResourceBusy));
        }
        FsCopier.remove_dir_all(path)
    }
}

#[tokio::test]
async fn test_locked_file_in_default_directory_is_skipped() {
    let inst = Installation::new("1.9.0");
    let files = payload("App", "1.9.1");
    let release = inst.cache_release("1.9.1", &as_refs(&files));

    let (engine, interaction) = inst.engine(vec![Confirmation::Yes]);
    let engine = engine.with_copier(Box::new(BusyCopier {
        busy: "core.dll",
    }));
    let mut ctx = UpdateContext::new();
    engine.apply_release(&mut ctx, release).await.unwrap();

    assert_eq!(ctx.state(), UpdateState::Relaunching);
    let report = ctx.report.as_ref().unwrap();
    let skipped: Vec<_> = report.skipped.iter().map(|s| s.path.clone()).collect();
    assert_eq!(
        skipped,
        vec![Path::new("config").join("user.ico"), Path::new("modules").join("core.dll")]
    );
    assert!(report.failed.is_empty());

    assert_eq!(inst.read("modules/core.dll"), "core 1.9.0");
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.1");
    assert!(!interaction.warnings().is_empty());
    assert_eq!(inst.marker().as_deref(), Some("1.9.1"));
}

#[tokio::test]
async fn test_up_to_date_installation_is_left_alone() {
    let mut inst = Installation::new("1.9.1");
    let server = StaticServer::start().await.unwrap().with_json(
        "/repos/acme/widget/releases/latest",
        &latest_release("v1.9.1", json!([])),
    );
    inst.config.release.api_base = server.base_url();

    let (engine, interaction) = inst.engine(vec![Confirmation::Yes]);
    let mut ctx = UpdateContext::new();
    engine.run_update(&mut ctx, None, false).await.unwrap();

    assert_eq!(ctx.history(), &[UpdateState::Idle, UpdateState::CheckingForUpdate, UpdateState::NoUpdate]);
    assert!(interaction.prompts().is_empty());
    assert!(engine.backups().list().await.unwrap().is_empty());
    assert_eq!(engine.poll_for_update().await, None);
}

#[tokio::test]
async fn test_declined_offer_downloads_nothing() {
    let mut inst = Installation::new("1.9.0");
    let server = StaticServer::start().await.unwrap().with_json(
        "/repos/acme/widget/releases/tags/v2.0.0",
        &latest_release(
            "v2.0.0",
            json!([{ "name": "App-2.0.0.zip", "browser_download_url": "http://127.0.0.1:9/App-2.0.0.zip" }]),
        ),
    );
    inst.config.release.api_base = server.base_url();

    let (engine, interaction) = inst.engine(vec![Confirmation::No]);
    let mut ctx = UpdateContext::new();
    engine.run_update(&mut ctx, Some("v2.0.0"), false).await.unwrap();

    assert_eq!(ctx.state(), UpdateState::Declined);
    assert_eq!(interaction.prompts().len(), 1);
    assert!(!inst.cache_dir().join("App-2.0.0.zip").exists());
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.0");
    assert!(inst.launcher.started().is_empty());
}

#[tokio::test]
async fn test_failed_backup_stops_before_merge() {
    let inst = Installation::new("1.9.0");
    let files = payload("App", "1.9.1");
    let release = inst.cache_release("1.9.1", &as_refs(&files));
    // A file where the backup directory should be
    std::fs::write(inst.cache_dir().join("backups"), "not a directory").unwrap();

    let (engine, interaction) = inst.engine(vec![Confirmation::Yes]);
    let mut ctx = UpdateContext::new();
    let err = engine.apply_release(&mut ctx, release).await.unwrap_err();

    assert_eq!(ctx.state(), UpdateState::BackupFailed);
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::BackupFailed { .. })
    ));
    assert!(!ctx.history().contains(&UpdateState::Merging));
    assert!(ctx.report.is_none());
    assert!(!interaction.warnings().is_empty());

    assert_eq!(inst.read("Widget.exe"), "widget 1.9.0");
    assert_eq!(inst.read("modules/core.dll"), "core 1.9.0");
    assert_eq!(inst.read("config/defaults.ini"), "theme=light");
    assert_eq!(inst.marker().as_deref(), Some("1.9.0"));
    assert!(inst.launcher.started().is_empty());
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn test_cache_nested_inside_installation_is_not_backed_up() {
    let mut inst = Installation::new("1.9.0");
    inst.config.install.cache_dir = Some(inst.install_dir().join("data").join("cache"));
    let files = payload("App", "1.9.1");
    let release = inst.cache_release("1.9.1", &as_refs(&files));

    let (engine, _) = inst.engine(vec![Confirmation::Yes]);
    let mut ctx = UpdateContext::new();
    engine.apply_release(&mut ctx, release).await.unwrap();

    assert_eq!(ctx.state(), UpdateState::Relaunching);
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.1");

    let backup = ctx.backup.as_ref().unwrap();
    let restored = TempDir::new().unwrap();
    extract_archive(&backup.archive_path, restored.path()).unwrap();
    assert_eq!(
        list_files(restored.path()),
        vec!["VERSION", "Widget.exe", "config/defaults.ini", "config/user.ico", "modules/core.dll"]
    );
}
