//! Backups: snapshot contents, retention, and restoring through the engine.

use hotswap_updater::core::UpdateError;
use hotswap_updater::test_utils::{list_files, write_tree};
use hotswap_updater::upgrade::archive::extract_archive;
use hotswap_updater::upgrade::{BackupManager, Confirmation, UpdateContext, UpdateState};
use tempfile::TempDir;

use crate::common::{Installation, as_refs, payload};

#[tokio::test]
async fn test_snapshot_round_trips_installation_minus_exclusions() {
    let temp = TempDir::new().unwrap();
    let install = temp.path().join("install");
    write_tree(
        &install,
        &[
            ("Widget.exe", "bin"),
            ("config/defaults.ini", "a=1"),
            ("config/nested/deep.txt", "deep"),
            ("logs/today.log", "noise"),
            ("cache/App-1.0.0.zip", "not really a zip"),
        ],
    )
    .unwrap();

    let manager = BackupManager::new(temp.path().join("backups"));
    let record = manager
        .snapshot(&install, "1.0.0", &["cache".to_string(), "logs".to_string()])
        .await
        .unwrap();
    assert_eq!(record.source_version, "1.0.0");
    assert!(record.archive_path.file_name().unwrap().to_string_lossy().starts_with("1.0.0_"));

    let restored = temp.path().join("restored");
    extract_archive(&record.archive_path, &restored).unwrap();

    assert_eq!(
        list_files(&restored),
        vec!["Widget.exe", "config/defaults.ini", "config/nested/deep.txt"]
    );
    assert_eq!(std::fs::read_to_string(restored.join("config/nested/deep.txt")).unwrap(), "deep");
}

#[tokio::test]
async fn test_update_then_restore_previous_version() {
    let inst = Installation::new("1.9.0");
    let files = payload("App", "1.9.1");
    let release = inst.cache_release("1.9.1", &as_refs(&files));

    let (engine, _) = inst.engine(vec![Confirmation::Yes, Confirmation::Yes]);
    engine.apply_release(&mut UpdateContext::new(), release).await.unwrap();
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.1");

    let mut ctx = UpdateContext::new();
    engine.restore_backup(&mut ctx, None).await.unwrap();

    assert_eq!(ctx.state(), UpdateState::Relaunching);
    assert_eq!(inst.read("Widget.exe"), "widget 1.9.0");
    assert_eq!(inst.read("modules/core.dll"), "core 1.9.0");
    assert_eq!(inst.read("config/defaults.ini"), "theme=light");
    assert_eq!(inst.marker().as_deref(), Some("1.9.0"));
    assert_eq!(inst.launcher.started().len(), 2);
}

#[tokio::test]
async fn test_declined_restore_changes_nothing() {
    let inst = Installation::new("1.9.0");
    let (engine, interaction) = inst.engine(vec![Confirmation::No]);
    engine
        .backups()
        .snapshot(&inst.install_dir(), "1.8.0", &[])
        .await
        .unwrap();
    std::fs::write(inst.install_dir().join("Widget.exe"), "edited").unwrap();

    let mut ctx = UpdateContext::new();
    engine.restore_backup(&mut ctx, Some("1.8.0")).await.unwrap();

    assert_eq!(ctx.state(), UpdateState::Declined);
    assert_eq!(interaction.prompts().len(), 1);
    assert_eq!(inst.read("Widget.exe"), "edited");
    assert_eq!(engine.backups().list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_restore_without_backups() {
    let inst = Installation::new("1.9.0");
    let (engine, interaction) = inst.engine(vec![Confirmation::Yes]);

    let err = engine.restore_backup(&mut UpdateContext::new(), None).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpdateError>(),
        Some(UpdateError::BackupNotFound { .. })
    ));
    assert!(interaction.prompts().is_empty());
}

#[tokio::test]
async fn test_retention_prunes_oldest_backups() {
    let mut inst = Installation::new("1.9.0");
    inst.config.upgrade.backup_retention = 1;
    let files = payload("App", "1.9.1");
    let release = inst.cache_release("1.9.1", &as_refs(&files));

    let (engine, _) = inst.engine(vec![Confirmation::Yes]);
    engine.backups().snapshot(&inst.install_dir(), "1.8.0", &[]).await.unwrap();
    engine.apply_release(&mut UpdateContext::new(), release).await.unwrap();

    let versions: Vec<String> =
        engine.backups().list().await.unwrap().into_iter().map(|r| r.source_version).collect();
    assert_eq!(versions, vec!["1.9.0".to_string()]);
}
