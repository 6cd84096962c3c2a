//! Provenance Engine - version-tree history for dataflow workflows
//!
//! Every edit to a workflow is recorded as an immutable [`Action`] of
//! primitive add/delete/change operations, and actions form a version tree
//! (a [`Vistrail`]). This crate provides:
//!
//! - Deterministic materialization of any version
//! - Diffs between arbitrary versions, with heuristic re-matching of
//!   near-identical modules and connections
//! - Inlining of groups and abstraction references
//! - A patch algebra that turns any two versions into one synthetic action
//! - Synchronization of an independently edited fork back into its log
//!
//! # Architecture
//!
//! - `Vistrail`: the action log, its tags, nested abstractions and id scope
//! - `ActionBuilder`: allocates ids and commits actions into a log
//! - `ProvenanceEngine`: calling-layer facade with a compressed
//!   materialization cache
//! - `LogStore`: persistence collaborator, with a JSON directory store
//!
//! # Example
//!
//! ```ignore
//! use provenance_engine::{ProvenanceEngine, Vistrail, ROOT_VERSION};
//!
//! let mut log = Vistrail::new("analysis");
//! let mut b = log.begin_action(ROOT_VERSION);
//! let reader = b.add_module("Reader", "basic");
//! b.add_function(reader, "path", &[("String", "in.csv")]);
//! let v1 = b.commit()?;
//!
//! let mut engine = ProvenanceEngine::default();
//! let workflow = engine.materialize(&log, v1)?;
//! ```

pub mod action;
pub mod builder;
pub mod changeset;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod groups;
pub mod heuristic;
pub mod ids;
pub mod materialize;
pub mod operation;
pub mod patch;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod types;
pub mod validation;
pub mod vistrail;

#[cfg(test)]
mod test_support;

// Re-export key types
pub use action::{Action, ActionId, Tag, ROOT_VERSION};
pub use builder::{ActionBuilder, PortEnd};
pub use changeset::ChangeSet;
pub use config::EngineConfig;
pub use diff::{operation_diff, shared_root, workflow_diff, WorkflowDiff};
pub use engine::{CacheStats, ProvenanceEngine};
pub use error::{ProvenanceError, Result};
pub use groups::{expand_groups, ExpandedWorkflow};
pub use heuristic::MatchScore;
pub use ids::{IdScope, ObjectId, ObjectKind, RemapContext, ScratchIds};
pub use materialize::{materialize, perform_action, OperationDict};
pub use operation::{Entity, OpKey, Operation, ParentRef};
pub use patch::{get_path_as_action, invert, normalize, simplify};
pub use snapshot::SnapshotCache;
pub use store::{JsonLogStore, LogStore};
pub use sync::{synchronize, SyncConflict, SyncReport};
pub use types::{
    Annotation, Connection, Function, Location, Module, ModuleKind, Other, Parameter, Port,
    PortDirection, PortRole, PortSpec, Workflow,
};
pub use validation::{validate_workflow, ValidationError};
pub use vistrail::Vistrail;
