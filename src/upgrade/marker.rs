//! Configuration store holding the persisted version marker.
//!
//! The engine only ever reads and writes one value through [`ConfigStore`]: the
//! "last known installed version". Hosts backed by the Windows registry implement
//! the trait against their registry key; the crate ships a TOML file store and an
//! in-memory store.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::utils::fs::ensure_parent_dir;

/// Key/value store scoped to a fixed installation key.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

type Tables = BTreeMap<String, BTreeMap<String, String>>;

/// TOML file with one table per installation key path.
///
/// ```toml
/// [installation]
/// DisplayVersion = "1.9.1"
/// ```
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
    key_path: String,
}

impl FileConfigStore {
    /// Store in the TOML file at `path`, keeping values in the table at the dotted
    /// `key_path` (for example `installation` or `app.installation`).
    pub fn new(path: impl Into<PathBuf>, key_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key_path: key_path.into(),
        }
    }

    /// File backing the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_tables(&self) -> Result<Tables> {
        if !self.path.exists() {
            return Ok(Tables::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read marker store {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse marker store {}", self.path.display()))
    }

    fn write_tables(&self, tables: &Tables) -> Result<()> {
        ensure_parent_dir(&self.path)?;
        let content = toml::to_string_pretty(tables).context("Failed to serialize marker store")?;

        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary marker file")?;
        temp.write_all(content.as_bytes())?;
        temp.persist(&self.path)
            .with_context(|| format!("Failed to write marker store {}", self.path.display()))?;
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let tables = self.read_tables()?;
        Ok(tables.get(&self.key_path).and_then(|table| table.get(key)).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut tables = self.read_tables()?;
        tables.entry(self.key_path.clone()).or_default().insert(key.to_string(), value.to_string());
        self.write_tables(&tables)?;
        debug!("Marker store: {}\\{} = {}", self.key_path, key, value);
        Ok(())
    }
}

/// Process-local store, for hosts without persistence and for tests.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with one value.
    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        store
    }
}

impl ConfigStore for MemoryConfigStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values =
            self.values.lock().map_err(|_| anyhow::anyhow!("marker store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values =
            self.values.lock().map_err(|_| anyhow::anyhow!("marker store lock poisoned"))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
