//! Engine facade for calling layers
//!
//! [`ProvenanceEngine`] bundles the configuration with a compressed
//! materialization cache and exposes the operations a UI or service layer
//! needs. Logs are passed in by reference, so the engine never owns them
//! and one engine can serve any number of logs.
//!
//! # Example
//!
//! ```ignore
//! let mut engine = ProvenanceEngine::new(EngineConfig::load("engine.json")?);
//! let workflow = engine.materialize(&log, version)?;
//! let expanded = engine.expand_groups(&log, &workflow)?;
//! let diff = engine.diff(&log, v1, v2)?;
//! ```

use crate::action::{Action, ActionId};
use crate::config::EngineConfig;
use crate::diff::{workflow_diff, WorkflowDiff};
use crate::error::Result;
use crate::groups::{expand_groups, ExpandedWorkflow};
use crate::materialize;
use crate::patch::get_path_as_action;
use crate::snapshot::SnapshotCache;
use crate::sync::{synchronize, SyncReport};
use crate::types::Workflow;
use crate::validation::{validate_workflow, ValidationError};
use crate::vistrail::Vistrail;

/// Entry point for materializing, diffing, patching and merging logs
pub struct ProvenanceEngine {
    config: EngineConfig,
    cache: SnapshotCache,
    hits: u64,
    misses: u64,
}

impl ProvenanceEngine {
    /// Create an engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        let cache = SnapshotCache::new(config.snapshot_cache_capacity, config.compression_level);
        Self {
            config,
            cache,
            hits: 0,
            misses: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Materialization
    // =========================================================================

    /// Workflow at `version`, served from the snapshot cache when possible
    pub fn materialize(&mut self, log: &Vistrail, version: ActionId) -> Result<Workflow> {
        match self.cache.get(log.id, version) {
            Some(Ok(workflow)) => {
                self.hits += 1;
                return Ok(workflow);
            }
            Some(Err(e)) => log::warn!("Discarding unreadable snapshot of version {}: {}", version, e),
            None => {}
        }

        self.misses += 1;
        let workflow = materialize::materialize(log, version)?;
        self.cache.insert(log.id, version, &workflow)?;
        Ok(workflow)
    }

    /// Inline every group and abstraction reference of `workflow`
    pub fn expand_groups(&self, log: &Vistrail, workflow: &Workflow) -> Result<ExpandedWorkflow> {
        expand_groups(log, workflow, &self.config.basic_package)
    }

    /// Materialize `version` and expand its groups
    pub fn materialize_expanded(&mut self, log: &Vistrail, version: ActionId) -> Result<ExpandedWorkflow> {
        let workflow = self.materialize(log, version)?;
        self.expand_groups(log, &workflow)
    }

    /// Structural problems of the workflow at `version`
    pub fn validate(&mut self, log: &Vistrail, version: ActionId) -> Result<Vec<ValidationError>> {
        let workflow = self.materialize(log, version)?;
        Ok(validate_workflow(&workflow))
    }

    // =========================================================================
    // Diff, patch and merge
    // =========================================================================

    /// Compare two versions, pairing near-identical objects if configured
    pub fn diff(&self, log: &Vistrail, v1: ActionId, v2: ActionId) -> Result<WorkflowDiff> {
        workflow_diff(log, v1, v2, self.config.heuristic_match)
    }

    /// One synthetic action that turns `v1` into `v2`
    pub fn get_path_as_action(&self, log: &Vistrail, v1: ActionId, v2: ActionId) -> Result<Action> {
        get_path_as_action(log, v1, v2)
    }

    /// Merge a fork's changes into the canonical log
    ///
    /// Cached snapshots stay valid: existing actions are never rewritten and
    /// copied actions get fresh ids.
    pub fn synchronize(&mut self, canonical: &mut Vistrail, fork: &Vistrail) -> Result<SyncReport> {
        synchronize(canonical, fork)
    }

    // =========================================================================
    // Cache management
    // =========================================================================

    /// Forget every cached snapshot of `log`
    pub fn evict_log(&mut self, log: &Vistrail) {
        self.cache.invalidate_log(log.id);
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            cached_snapshots: self.cache.len(),
            compressed_bytes: self.cache.compressed_size(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

impl Default for ProvenanceEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Statistics about the materialization cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of workflows held in the cache
    pub cached_snapshots: usize,
    /// Total compressed size of the cached workflows
    pub compressed_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ROOT_VERSION;
    use crate::groups::INPUT_PORT;
    use crate::test_support::branching_log;
    use crate::types::{Function, Module, Parameter};

    #[test]
    fn test_materialize_is_cached() {
        let (log, versions) = branching_log();
        let mut engine = ProvenanceEngine::default();

        let first = engine.materialize(&log, versions[2]).unwrap();
        let second = engine.materialize(&log, versions[2]).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, log.materialize(versions[2]).unwrap());

        let stats = engine.cache_stats();
        assert_eq!((stats.hits, stats.misses, stats.cached_snapshots), (1, 1, 1));

        engine.evict_log(&log);
        assert_eq!(engine.cache_stats().cached_snapshots, 0);
    }

    #[test]
    fn test_diff_respects_heuristic_setting() {
        let mut log = Vistrail::new("heuristic");
        let mut b = log.begin_action(ROOT_VERSION);
        b.add_module("Base", "basic");
        let v1 = b.commit().unwrap();
        let mut b = log.begin_action(v1);
        b.add_module("Reader", "basic");
        let left = b.commit().unwrap();
        let mut b = log.begin_action(v1);
        b.add_module("Reader", "basic");
        let right = b.commit().unwrap();

        let engine = ProvenanceEngine::default();
        let diff = engine.diff(&log, left, right).unwrap();
        assert_eq!(diff.heuristic_modules.len(), 1);
        assert!(diff.is_unchanged());

        let plain = ProvenanceEngine::new(EngineConfig::default().with_heuristic_match(false));
        let diff = plain.diff(&log, left, right).unwrap();
        assert!(diff.heuristic_modules.is_empty());
        assert_eq!((diff.v1_only_modules.len(), diff.v2_only_modules.len()), (1, 1));
    }

    #[test]
    fn test_path_and_sync_through_engine() {
        let (mut log, versions) = branching_log();
        let mut engine = ProvenanceEngine::default();

        let path = engine.get_path_as_action(&log, versions[2], versions[4]).unwrap();
        let mut workflow = engine.materialize(&log, versions[2]).unwrap();
        materialize::perform_action(&mut workflow, &path).unwrap();
        assert_eq!(workflow, engine.materialize(&log, versions[4]).unwrap());

        let mut fork = log.fork();
        let mut b = fork.begin_action(versions[4]);
        b.add_module("Sink", "basic");
        let added = b.commit().unwrap();

        let report = engine.synchronize(&mut log, &fork).unwrap();
        let copied = report.copied_actions[0].1;
        assert_eq!(report.copied_actions[0].0, added);
        let merged = engine.materialize(&log, copied).unwrap();
        assert!(merged.modules.values().any(|m| m.name == "Sink"));
        assert!(engine.validate(&log, copied).unwrap().is_empty());
    }

    #[test]
    fn test_expand_uses_configured_package() {
        let log = Vistrail::new("groups");
        let proxy = Module::new(1, INPUT_PORT, "custom.basic").with_function(
            Function::new(1, "name", 0).with_parameter(Parameter::new(1, 0, "String", "in")),
        );
        let body = Workflow::new()
            .with_module(proxy)
            .with_module(Module::new(2, "Worker", "custom.basic"));
        let workflow = Workflow::new().with_module(Module::group(5, "custom.basic", body));

        let engine = ProvenanceEngine::new(EngineConfig::default().with_basic_package("custom.basic"));
        let expanded = engine.expand_groups(&log, &workflow).unwrap();
        let names: Vec<_> = expanded.workflow().modules.values().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Worker"]);

        let other = ProvenanceEngine::default().expand_groups(&log, &workflow).unwrap();
        assert_eq!(other.workflow().modules.len(), 2);
    }

    #[test]
    fn test_group_snapshots_are_cached() {
        let (log, v1) = crate::test_support::group_log();
        let mut engine = ProvenanceEngine::default();

        let first = engine.materialize(&log, v1).unwrap();
        let second = engine.materialize(&log, v1).unwrap();
        assert_eq!(first, second);
        let stats = engine.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_forks_do_not_share_snapshots() {
        let (log, versions) = branching_log();
        let mut left = log.fork();
        let mut right = log.fork();
        let mut engine = ProvenanceEngine::default();

        let mut b = left.begin_action(versions[2]);
        b.add_module("Left", "basic");
        let on_left = b.commit().unwrap();
        let mut b = right.begin_action(versions[2]);
        b.add_module("Right", "basic");
        let on_right = b.commit().unwrap();
        assert_eq!(on_left, on_right);

        let left_workflow = engine.materialize(&left, on_left).unwrap();
        let right_workflow = engine.materialize(&right, on_right).unwrap();
        assert!(left_workflow.modules.values().any(|m| m.name == "Left"));
        assert!(right_workflow.modules.values().any(|m| m.name == "Right"));
        assert_eq!(engine.cache_stats().misses, 2);
    }
}
