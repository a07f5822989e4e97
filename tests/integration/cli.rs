//! The `hotswap` binary.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use hotswap_updater::test_utils::write_tree;
use hotswap_updater::upgrade::version_check::VersionCheckCache;
use predicates::prelude::*;
use tempfile::TempDir;

use crate::common::UNREACHABLE;

/// Installation at 1.2.0 plus a config file pointing at it. Returns the config path.
fn setup(temp: &Path) -> PathBuf {
    let install = temp.join("install");
    write_tree(&install, &[("VERSION", "1.2.0"), ("Widget.exe", "bin")]).unwrap();

    let config = format!(
        r#"
[release]
repo = "acme/widget"
api_base = "{UNREACHABLE}"
timeout_secs = 5

[install]
install_dir = '{}'
cache_dir = '{}'
entry_file = "Widget.exe"
required_files = ["Widget.exe"]
"#,
        install.display(),
        temp.join("cache").display()
    );
    let path = temp.join("hotswap.toml");
    fs::write(&path, config).unwrap();
    path
}

fn hotswap() -> Command {
    let mut cmd = Command::cargo_bin("hotswap").unwrap();
    cmd.env_remove("HOTSWAP_CONFIG").env_remove("RUST_LOG").arg("--no-progress");
    cmd
}

#[test]
fn test_help_lists_commands() {
    hotswap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("restore"))
        .stdout(predicate::str::contains("repair"));
}

#[test]
fn test_status_reports_version_and_missing_marker() {
    let temp = TempDir::new().unwrap();
    let config = setup(temp.path());

    hotswap()
        .arg("status")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Current version: 1.2.0"))
        .stdout(predicate::str::contains("not set"))
        .stdout(predicate::str::contains("Backups:         0"));
}

#[test]
fn test_repair_writes_marker() {
    let temp = TempDir::new().unwrap();
    let config = setup(temp.path());

    hotswap()
        .args(["--quiet", "repair", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("All required files are present"));

    let markers = fs::read_to_string(temp.path().join("markers.toml")).unwrap();
    assert!(markers.contains("1.2.0"), "{markers}");

    hotswap()
        .arg("status")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Marker:          1.2.0"));
}

#[tokio::test]
async fn test_repair_reports_update_when_checking_on_startup() {
    let temp = TempDir::new().unwrap();
    let config = setup(temp.path());
    let mut content = fs::read_to_string(&config).unwrap();
    content.push_str("\n[upgrade]\ncheck_on_startup = true\n");
    fs::write(&config, content).unwrap();
    VersionCheckCache::new("1.2.0".to_string(), "2.0.0".to_string())
        .save(&temp.path().join("cache/version_check.json"))
        .await
        .unwrap();

    hotswap()
        .args(["repair", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Version 2.0.0 is available"));
}

#[test]
fn test_restore_list_without_backups() {
    let temp = TempDir::new().unwrap();
    let config = setup(temp.path());

    hotswap()
        .args(["restore", "--list", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups in"));
}

#[test]
fn test_config_from_environment() {
    let temp = TempDir::new().unwrap();
    let config = setup(temp.path());

    hotswap()
        .env("HOTSWAP_CONFIG", &config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("1.2.0"));
}

#[test]
fn test_check_fails_when_registry_unreachable() {
    let temp = TempDir::new().unwrap();
    let config = setup(temp.path());

    hotswap()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_invalid_config_is_reported() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("hotswap.toml");
    fs::write(&path, "[release]\nrepo = \"no-slash\"\n[install]\ninstall_dir = \"/x\"\nentry_file = \"a\"\n")
        .unwrap();

    hotswap()
        .args(["status", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("owner/name"));
}
