//! Configuration for the engine: the managed installation, the release source, merge
//! rules and the version marker location.

pub mod engine;

pub use engine::{
    BACKUP_DIR_NAME, EngineConfig, InstallSettings, LaunchSettings, MarkerSettings,
    MergeSettings, ReleaseSettings, RuleKind,
};
