//! Log persistence
//!
//! The engine itself is storage-agnostic: anything that can load and save a
//! [`Vistrail`] implements [`LogStore`]. Saves receive the log's pending
//! [`ChangeSet`] so a store can skip untouched logs or write incrementally.
//!
//! [`JsonLogStore`] keeps one pretty-printed JSON file per log in a
//! directory.
//!
//! # Example
//!
//! ```ignore
//! let store = JsonLogStore::new(".provenance/logs");
//! store.commit(&mut log)?;
//! let again = store.load_log(log.id)?;
//! ```

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::changeset::ChangeSet;
use crate::error::Result;
use crate::vistrail::Vistrail;

/// Persistence collaborator for action logs
pub trait LogStore {
    /// Load a log by id, with its derived indices rebuilt
    fn load_log(&self, id: Uuid) -> Result<Vistrail>;

    /// Persist `log` given what changed since the last save
    ///
    /// Returns whether anything was written.
    fn save_log(&self, log: &Vistrail, changes: &ChangeSet) -> Result<bool>;

    /// Save the log's pending changes and clear them once written
    fn commit(&self, log: &mut Vistrail) -> Result<bool> {
        let written = self.save_log(log, log.changes())?;
        if written {
            log.take_changes();
        }
        Ok(written)
    }
}

/// Directory of `<uuid>.json` log files
#[derive(Debug, Clone)]
pub struct JsonLogStore {
    path: PathBuf,
}

impl JsonLogStore {
    /// Create a store rooted at `path`
    ///
    /// The directory will be created if it doesn't exist when saving.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_for(&self, id: Uuid) -> PathBuf {
        self.path.join(format!("{}.json", id))
    }

    /// Load every log in the directory
    ///
    /// Files that fail to parse are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<Vistrail>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut logs = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let file_path = entry?.path();
            if !file_path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let content = std::fs::read_to_string(&file_path)?;
            match Self::parse(&content) {
                Ok(log) => {
                    log::info!("Loaded log '{}' ({} actions) from {:?}", log.name, log.len(), file_path);
                    logs.push(log);
                }
                Err(e) => {
                    log::warn!("Failed to load log from {:?}: {}", file_path, e);
                }
            }
        }
        logs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(logs)
    }

    fn parse(content: &str) -> Result<Vistrail> {
        let mut log: Vistrail = serde_json::from_str(content)?;
        log.reindex()?;
        Ok(log)
    }

    /// Remove a log's file, if present
    pub fn delete_log(&self, id: Uuid) -> Result<bool> {
        let file_path = self.file_for(id);
        if !file_path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&file_path)?;
        log::debug!("Deleted log {} from {:?}", id, file_path);
        Ok(true)
    }
}

impl LogStore for JsonLogStore {
    fn load_log(&self, id: Uuid) -> Result<Vistrail> {
        let content = std::fs::read_to_string(self.file_for(id))?;
        let log = Self::parse(&content)?;
        log::info!("Loaded log '{}' ({} actions)", log.name, log.len());
        Ok(log)
    }

    fn save_log(&self, log: &Vistrail, changes: &ChangeSet) -> Result<bool> {
        if changes.is_empty() {
            return Ok(false);
        }

        std::fs::create_dir_all(&self.path)?;
        let file_path = self.file_for(log.id);
        let content = serde_json::to_string_pretty(log)?;
        std::fs::write(&file_path, content)?;
        log::debug!(
            "Saved log '{}' to {:?} ({} new actions)",
            log.name,
            file_path,
            changes.new_actions.len()
        );
        Ok(true)
    }
}
