//! Filesystem helpers for engine configuration and modeling metadata
//!
//! An engine directory holds `config.json` (the [`EngineConfig`]),
//! `metadata.json` (registry actions or a registry snapshot) and
//! `registry.json` (the last exported snapshot). Writes go through a temp
//! file and a rename.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::EngineConfig;
use super::action::RegistryAction;
use super::state::RegistryConfig;

/// Storage layout of an engine directory
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Get the modeling metadata path
    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    /// Get the exported registry snapshot path
    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    /// Write data atomically to a file
    ///
    /// Creates a temporary file, writes the data, syncs, then renames
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        write_atomic(path, data)
    }

    /// Read a file
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Failed to read file: {:?}", path))
    }
}

/// Create the engine directory
pub fn init_storage(root: &Path) -> Result<()> {
    fs::create_dir_all(root).with_context(|| format!("Failed to create directory: {:?}", root))
}

/// Write `data` to `path` through a synced temp file and a rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .with_context(|| format!("Failed to open directory: {:?}", parent))?;
        dir.sync_all().context("Failed to sync directory")?;
    }

    Ok(())
}

/// Write engine configuration into `root`
pub fn write_config(root: &Path, config: &EngineConfig) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;
    storage.write_atomic(&storage.config_path(), &json)
}

/// Load engine configuration from `root`, falling back to defaults when absent
pub fn load_config(root: &Path) -> Result<EngineConfig> {
    let storage = Storage::new(root.to_path_buf());
    let config_path = storage.config_path();
    if !config_path.exists() {
        return Ok(EngineConfig::default());
    }

    let data = storage.read_file(&config_path)?;
    serde_json::from_slice(&data).with_context(|| format!("Failed to deserialize config {:?}", config_path))
}

/// Load modeling metadata as a list of registry actions.
///
/// Accepts an array of actions, a single action, or a full registry snapshot
/// (which becomes one `INIT`).
pub fn load_metadata(path: &Path) -> Result<Vec<RegistryAction>> {
    let data = fs::read(path).with_context(|| format!("Failed to read metadata: {:?}", path))?;
    let document: Value =
        serde_json::from_slice(&data).with_context(|| format!("Metadata {:?} is not JSON", path))?;
    parse_metadata(document).with_context(|| format!("Failed to decode metadata {:?}", path))
}

/// Decode an in-memory metadata document (see [`load_metadata`]).
pub fn parse_metadata(document: Value) -> Result<Vec<RegistryAction>> {
    if document.get("type").is_some() {
        let action = serde_json::from_value(document).context("Invalid registry action")?;
        return Ok(vec![action]);
    }

    match document {
        Value::Array(_) => serde_json::from_value(document).context("Invalid registry action list"),
        Value::Object(_) => {
            let payload: RegistryConfig =
                serde_json::from_value(document).context("Invalid registry snapshot")?;
            Ok(vec![RegistryAction::Init { payload }])
        }
        other => anyhow::bail!(
            "Expected registry actions or a registry snapshot, found {}",
            crate::interpreter::value::type_name(&other)
        ),
    }
}

/// Write a registry snapshot atomically
pub fn write_snapshot(path: &Path, config: &RegistryConfig) -> Result<()> {
    let json = serde_json::to_vec_pretty(config).context("Failed to serialize registry snapshot")?;
    write_atomic(path, &json)
}
