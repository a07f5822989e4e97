//! Startup guard: missing required files come back from the installed version's archive.

use std::fs;

use hotswap_updater::core::UpdateError;
use hotswap_updater::test_utils::{StaticServer, write_zip};
use serde_json::json;
use tempfile::TempDir;

use crate::common::{Installation, as_refs, payload};

fn require(inst: &mut Installation, files: &[&str]) {
    inst.config.install.required_files = files.iter().map(|f| (*f).to_string()).collect();
}

#[tokio::test]
async fn test_repair_restores_missing_files_from_cached_archive() {
    let mut inst = Installation::new("1.9.0");
    require(&mut inst, &["Widget.exe", "config/defaults.ini", "modules/core.dll"]);
    let files = payload("App", "1.9.0");
    inst.cache_release("1.9.0", &as_refs(&files));

    fs::remove_file(inst.install_dir().join("Widget.exe")).unwrap();
    fs::remove_dir_all(inst.install_dir().join("config")).unwrap();
    fs::write(inst.install_dir().join("modules/core.dll"), "patched locally").unwrap();

    let (engine, _) = inst.engine(vec![]);
    let report = engine.startup_guard().await.unwrap();

    assert_eq!(report.version.as_deref(), Some("1.9.0"));
    assert_eq!(report.restored, vec!["Widget.exe".to_string(), "config/defaults.ini".to_string()]);
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.0");
    assert_eq!(inst.read("config/defaults.ini"), "theme=dark");
    // Present files are not touched, and only required files come back
    assert_eq!(inst.read("modules/core.dll"), "patched locally");
    assert!(!inst.install_dir().join("config/user.ico").exists());
}

#[tokio::test]
async fn test_repair_downloads_archive_for_installed_version() {
    let mut inst = Installation::new("1.9.0");
    require(&mut inst, &["Widget.exe"]);
    fs::remove_file(inst.install_dir().join("Widget.exe")).unwrap();

    let staging = TempDir::new().unwrap();
    let archive = staging.path().join("App-1.9.0.zip");
    let files = payload("App", "1.9.0");
    write_zip(&archive, &as_refs(&files)).unwrap();

    let server = StaticServer::start().await.unwrap();
    let release = json!({
        "tag_name": "v1.9.0",
        "assets": [{ "name": "App-1.9.0.zip", "browser_download_url": server.url("/dl/App-1.9.0.zip") }],
    });
    let server = server
        .with_json("/repos/acme/widget/releases/tags/v1.9.0", &release)
        .with_file("/dl/App-1.9.0.zip", fs::read(&archive).unwrap());
    inst.config.release.api_base = server.base_url();

    let (engine, _) = inst.engine(vec![]);
    let report = engine.startup_guard().await.unwrap();

    assert_eq!(report.restored, vec!["Widget.exe".to_string()]);
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.0");
    assert!(inst.cache_dir().join("App-1.9.0.zip").is_file());
}

#[tokio::test]
async fn test_repair_reconciles_stale_marker() {
    let inst = Installation::new("1.9.0");
    {
        use hotswap_updater::upgrade::ConfigStore;
        inst.store.set(crate::common::MARKER_KEY, "1.8.2").unwrap();
    }

    let (engine, _) = inst.engine(vec![]);
    let report = engine.startup_guard().await.unwrap();

    assert!(report.is_noop());
    assert_eq!(inst.marker().as_deref(), Some("1.9.0"));
    assert!(engine.installation_state().unwrap().is_consistent());
}

#[tokio::test]
async fn test_repair_without_archive_or_registry_fails() {
    let mut inst = Installation::new("1.9.0");
    require(&mut inst, &["Widget.exe"]);
    fs::remove_file(inst.install_dir().join("Widget.exe")).unwrap();

    let (engine, _) = inst.engine(vec![]);
    let err = engine.startup_guard().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::NetworkError { .. })
    ));
    assert!(!inst.install_dir().join("Widget.exe").exists());
    assert!(!engine.is_busy());
}

#[tokio::test]
async fn test_repair_reports_files_missing_from_archive() {
    let mut inst = Installation::new("1.9.0");
    require(&mut inst, &["Widget.exe", "plugins/extra.dll"]);
    let files = payload("App", "1.9.0");
    inst.cache_release("1.9.0", &as_refs(&files));
    fs::remove_file(inst.install_dir().join("Widget.exe")).unwrap();

    let (engine, _) = inst.engine(vec![]);
    let err = engine.startup_guard().await.unwrap_err();

    match err.downcast_ref::<UpdateError>() {
        Some(UpdateError::RepairIncomplete {
            missing,
        }) => assert_eq!(missing, &vec!["plugins/extra.dll".to_string()]),
        other => panic!("expected RepairIncomplete, got {other:?}"),
    }
    // What the archive had was still restored
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.0");
}

#[tokio::test]
async fn test_repair_ignores_archive_of_longer_version() {
    let mut inst = Installation::new("1.9.1");
    require(&mut inst, &["config/defaults.ini"]);
    fs::remove_file(inst.install_dir().join("config/defaults.ini")).unwrap();
    write_zip(
        &inst.cache_dir().join("App-1.9.10.zip"),
        &[("App/Widget.exe", "widget 1.9.10"), ("App/config/defaults.ini", "from 1.9.10")],
    )
    .unwrap();

    let (engine, _) = inst.engine(vec![]);
    let err = engine.startup_guard().await.unwrap_err();

    // No archive for 1.9.1 and no registry: nothing is restored from 1.9.10
    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::NetworkError { .. })
    ));
    assert!(!inst.install_dir().join("config/defaults.ini").exists());
}
