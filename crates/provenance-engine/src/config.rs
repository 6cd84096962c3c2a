//! Engine configuration
//!
//! Stored as camelCase JSON. A missing file means defaults, so a fresh
//! installation needs no config at all.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Package whose `InputPort`/`OutputPort` modules act as group proxies
pub const DEFAULT_BASIC_PACKAGE: &str = "org.vistrails.vistrails.basic";

/// Settings for [`crate::ProvenanceEngine`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Pair near-identical modules and connections in workflow diffs
    pub heuristic_match: bool,
    /// Package identifier of the group proxy modules
    pub basic_package: String,
    /// Maximum number of materialized workflows kept compressed in memory
    pub snapshot_cache_capacity: usize,
    /// zstd level for cached snapshots
    pub compression_level: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heuristic_match: true,
            basic_package: DEFAULT_BASIC_PACKAGE.to_string(),
            snapshot_cache_capacity: 64,
            compression_level: 3,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!("No engine config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::info!("Engine configuration saved to {:?}", path);
        Ok(())
    }

    pub fn with_heuristic_match(mut self, enabled: bool) -> Self {
        self.heuristic_match = enabled;
        self
    }

    pub fn with_basic_package(mut self, package: impl Into<String>) -> Self {
        self.basic_package = package.into();
        self
    }

    pub fn with_snapshot_cache_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_cache_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig::load(temp_dir.path().join("engine.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.heuristic_match);
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("engine.json");
        let config = EngineConfig::default()
            .with_heuristic_match(false)
            .with_basic_package("basic");
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"heuristicMatch\": false"));
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "snapshotCacheCapacity": 8 }"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.snapshot_cache_capacity, 8);
        assert_eq!(config.basic_package, DEFAULT_BASIC_PACKAGE);
    }
}
