//! Compressed cache of materialized workflows
//!
//! Materializing a deep version replays its whole action chain, so the
//! engine keeps recent results as zstd-compressed JSON snapshots keyed by
//! `(log id, version)`. Actions are immutable, which means a cached
//! snapshot never goes stale while its log exists.
//!
//! The cache is a bounded FIFO: once `capacity` snapshots are held the
//! oldest insertion is evicted first.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use crate::action::ActionId;
use crate::error::{ProvenanceError, Result};
use crate::types::Workflow;

type SnapshotKey = (Uuid, ActionId);

/// Bounded store of compressed workflow snapshots
pub struct SnapshotCache {
    /// Compressed workflows (zstd)
    snapshots: HashMap<SnapshotKey, Vec<u8>>,
    /// Insertion order, oldest first
    order: VecDeque<SnapshotKey>,
    /// Maximum number of snapshots to keep
    capacity: usize,
    level: i32,
}

impl SnapshotCache {
    /// Create a cache holding up to `capacity` snapshots compressed at `level`
    pub fn new(capacity: usize, level: i32) -> Self {
        Self {
            snapshots: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            level,
        }
    }

    /// Store the workflow of `version` in log `log_id`
    pub fn insert(&mut self, log_id: Uuid, version: ActionId, workflow: &Workflow) -> Result<()> {
        let json = serde_json::to_vec(workflow)?;
        let compressed = zstd::encode_all(&json[..], self.level)
            .map_err(|e| ProvenanceError::Compression(e.to_string()))?;

        let key = (log_id, version);
        if self.snapshots.insert(key, compressed).is_none() {
            self.order.push_back(key);
        }

        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.snapshots.remove(&oldest);
                log::debug!("Evicted snapshot of version {} from log {}", oldest.1, oldest.0);
            }
        }
        Ok(())
    }

    /// Decompress the snapshot of `version`, if cached
    pub fn get(&self, log_id: Uuid, version: ActionId) -> Option<Result<Workflow>> {
        self.snapshots
            .get(&(log_id, version))
            .map(|compressed| Self::decompress(compressed))
    }

    pub fn contains(&self, log_id: Uuid, version: ActionId) -> bool {
        self.snapshots.contains_key(&(log_id, version))
    }

    /// Drop every snapshot of one log
    pub fn invalidate_log(&mut self, log_id: Uuid) {
        self.snapshots.retain(|(id, _), _| *id != log_id);
        self.order.retain(|(id, _)| *id != log_id);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.order.clear();
    }

    /// Total compressed size of all snapshots
    pub fn compressed_size(&self) -> usize {
        self.snapshots.values().map(Vec::len).sum()
    }

    fn decompress(compressed: &[u8]) -> Result<Workflow> {
        let json = zstd::decode_all(compressed).map_err(|e| ProvenanceError::Compression(e.to_string()))?;
        let workflow: Workflow = serde_json::from_slice(&json)?;
        Ok(workflow)
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(64, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Function, Module, Parameter};

    fn workflow(name: &str) -> Workflow {
        Workflow::new().with_module(
            Module::new(1, name, "basic")
                .with_function(Function::new(2, "value", 0).with_parameter(Parameter::new(3, 0, "String", name))),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let mut cache = SnapshotCache::default();
        let log = Uuid::new_v4();
        cache.insert(log, 1, &workflow("first")).unwrap();

        assert_eq!(cache.get(log, 1).unwrap().unwrap(), workflow("first"));
        assert!(cache.get(log, 2).is_none());
        assert!(cache.get(Uuid::new_v4(), 1).is_none());
        assert!(cache.compressed_size() > 0);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut cache = SnapshotCache::new(2, 1);
        let log = Uuid::new_v4();
        cache.insert(log, 1, &workflow("a")).unwrap();
        cache.insert(log, 2, &workflow("b")).unwrap();
        cache.insert(log, 1, &workflow("a")).unwrap();
        cache.insert(log, 3, &workflow("c")).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(log, 1));
        assert!(cache.contains(log, 2));
        assert!(cache.contains(log, 3));
    }

    #[test]
    fn test_invalidate_log() {
        let mut cache = SnapshotCache::new(8, 3);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        cache.insert(a, 1, &workflow("a")).unwrap();
        cache.insert(b, 1, &workflow("b")).unwrap();

        cache.invalidate_log(a);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(b, 1));

        cache.clear();
        assert!(cache.is_empty());
    }
}
