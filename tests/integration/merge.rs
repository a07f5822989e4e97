//! Merge rules and payload location on real directory trees.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use hotswap_updater::config::{EngineConfig, MergeSettings, RuleKind};
use hotswap_updater::test_utils::{list_files, write_tree};
use hotswap_updater::upgrade::locator::{LocateStrategy, PayloadIndicators};
use hotswap_updater::upgrade::merge::MergeRules;
use hotswap_updater::upgrade::{InstallMerger, LocateOutcome, PayloadLocator};
use tempfile::TempDir;

fn merger(rules: &[(&str, RuleKind)]) -> InstallMerger {
    let settings = MergeSettings {
        locked_patterns: vec!["*.ico".to_string(), "*.png".to_string()],
        rules: rules.iter().map(|(n, k)| ((*n).to_string(), *k)).collect::<BTreeMap<_, _>>(),
    };
    InstallMerger::new(MergeRules::from_settings(&settings).unwrap())
}

fn read(root: &Path, relative: &str) -> String {
    fs::read_to_string(root.join(relative)).unwrap()
}

#[test]
fn test_additive_merge_keeps_locked_and_user_files() {
    let temp = TempDir::new().unwrap();
    let (payload, install) = (temp.path().join("payload"), temp.path().join("install"));
    write_tree(
        &payload,
        &[("config/app.ico", "stock"), ("config/theme.png", "stock"), ("config/defaults.ini", "new")],
    )
    .unwrap();
    write_tree(
        &install,
        &[("config/app.ico", "custom"), ("config/defaults.ini", "old"), ("config/mine.txt", "keep")],
    )
    .unwrap();

    let report = merger(&[("config", RuleKind::AdditiveMerge)]).apply(&payload, &install).unwrap();

    assert!(report.is_success());
    // Locked files that already exist are never overwritten, new ones are added
    assert_eq!(read(&install, "config/app.ico"), "custom");
    assert_eq!(read(&install, "config/theme.png"), "stock");
    assert_eq!(read(&install, "config/defaults.ini"), "new");
    // Nothing is ever removed
    assert_eq!(read(&install, "config/mine.txt"), "keep");
}

#[test]
fn test_full_replace_drops_stale_files() {
    let temp = TempDir::new().unwrap();
    let (payload, install) = (temp.path().join("payload"), temp.path().join("install"));
    write_tree(&payload, &[("modules/a.dll", "new a")]).unwrap();
    write_tree(&install, &[("modules/a.dll", "old a"), ("modules/obsolete.dll", "old")]).unwrap();

    let report = merger(&[("modules", RuleKind::FullReplace)]).apply(&payload, &install).unwrap();

    assert!(report.is_success());
    assert_eq!(list_files(&install), vec!["modules/a.dll"]);
    assert_eq!(read(&install, "modules/a.dll"), "new a");
}

#[test]
fn test_rule_lookup_ignores_case() {
    let temp = TempDir::new().unwrap();
    let (payload, install) = (temp.path().join("payload"), temp.path().join("install"));
    write_tree(&payload, &[("Config/app.ico", "stock")]).unwrap();
    write_tree(&install, &[("Config/app.ico", "custom")]).unwrap();

    let report = merger(&[("config", RuleKind::AdditiveMerge)]).apply(&payload, &install).unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(read(&install, "Config/app.ico"), "custom");
}

fn locator() -> PayloadLocator {
    let mut config = EngineConfig::new("acme/widget", "/unused", "Widget.exe");
    config.install.product_name = "Widget".to_string();
    PayloadLocator::new(PayloadIndicators::from_settings(&config.install))
}

#[test]
fn test_locate_is_deterministic() {
    let temp = TempDir::new().unwrap();
    write_tree(
        temp.path(),
        &[
            ("b-build/Widget.exe", "b"),
            ("a-build/Widget.exe", "a"),
            ("sources/Widget.exe", "s"),
            ("Widget-2.0/Widget.exe", "w"),
        ],
    )
    .unwrap();

    let first = locator().locate(temp.path()).unwrap();
    for _ in 0..5 {
        assert_eq!(locator().locate(temp.path()).unwrap(), first);
    }
    assert_eq!(
        first,
        LocateOutcome::Located {
            root: temp.path().join("Widget-2.0"),
            strategy: LocateStrategy::Subdirectory,
        }
    );
}

#[test]
fn test_locate_falls_back_to_recursive_scan() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("dist/win64/release/config/defaults.ini", "a=1")]).unwrap();

    let outcome = locator().locate(temp.path()).unwrap();

    assert_eq!(outcome.root(), Some(temp.path().join("dist/win64/release").as_path()));
}

#[test]
fn test_locate_not_found() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("docs/readme.md", "hi")]).unwrap();

    assert_eq!(locator().locate(temp.path()).unwrap(), LocateOutcome::NotFound);
}
