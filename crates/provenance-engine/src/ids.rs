//! Identity scopes for the object graph
//!
//! Every log owns an [`IdScope`] that hands out ids per object namespace.
//! Ids are never reused while the log is open. Group expansion works with a
//! separate [`ScratchIds`] allocator whose ids never reach the log, and copies
//! between logs thread a [`RemapContext`] through the traversal.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an object within its namespace
pub type ObjectId = i64;

/// The type of an object in the log or the workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Module,
    Group,
    AbstractionRef,
    Connection,
    Port,
    Function,
    Parameter,
    Annotation,
    Location,
    PortSpec,
    Other,
    Action,
    Operation,
    Tag,
}

impl ObjectKind {
    /// The id namespace this kind allocates from.
    ///
    /// Groups and abstraction references are module-like nodes that
    /// connections address by module id, so they share the module namespace.
    pub fn namespace(self) -> ObjectKind {
        match self {
            ObjectKind::Group | ObjectKind::AbstractionRef => ObjectKind::Module,
            other => other,
        }
    }

    /// Depth of this kind in the workflow ownership tree (0 = top level)
    pub fn depth(self) -> u8 {
        match self {
            ObjectKind::Module
            | ObjectKind::Group
            | ObjectKind::AbstractionRef
            | ObjectKind::Connection
            | ObjectKind::Other => 0,
            ObjectKind::Port
            | ObjectKind::Function
            | ObjectKind::Annotation
            | ObjectKind::Location
            | ObjectKind::PortSpec => 1,
            ObjectKind::Parameter => 2,
            ObjectKind::Action | ObjectKind::Operation | ObjectKind::Tag => 0,
        }
    }

    /// Whether objects of this kind live inside a workflow
    pub fn is_workflow_entity(self) -> bool {
        !matches!(
            self,
            ObjectKind::Action | ObjectKind::Operation | ObjectKind::Tag
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Module => "module",
            ObjectKind::Group => "group",
            ObjectKind::AbstractionRef => "abstraction_ref",
            ObjectKind::Connection => "connection",
            ObjectKind::Port => "port",
            ObjectKind::Function => "function",
            ObjectKind::Parameter => "parameter",
            ObjectKind::Annotation => "annotation",
            ObjectKind::Location => "location",
            ObjectKind::PortSpec => "port_spec",
            ObjectKind::Other => "other",
            ObjectKind::Action => "action",
            ObjectKind::Operation => "operation",
            ObjectKind::Tag => "tag",
        };
        f.write_str(name)
    }
}

/// Per-log id allocator with one monotonic counter per namespace
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IdScope {
    next: BTreeMap<ObjectKind, ObjectId>,
}

impl IdScope {
    /// Create a scope where every namespace starts at 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new id for `kind` and advance its counter
    pub fn get_new_id(&mut self, kind: ObjectKind) -> ObjectId {
        let next = self.next.entry(kind.namespace()).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }

    /// Raise the floor of `kind`'s counter so the next id is at least `begin`
    ///
    /// Lowering is ignored: ids are never handed out twice.
    pub fn update_begin_id(&mut self, kind: ObjectKind, begin: ObjectId) {
        let next = self.next.entry(kind.namespace()).or_insert(1);
        if begin > *next {
            *next = begin;
        }
    }

    /// The id the next allocation of `kind` would return
    pub fn peek(&self, kind: ObjectKind) -> ObjectId {
        self.next.get(&kind.namespace()).copied().unwrap_or(1)
    }

    /// Whether `id` has already been handed out (or reserved) for `kind`
    pub fn is_allocated(&self, kind: ObjectKind, id: ObjectId) -> bool {
        id > 0 && id < self.peek(kind)
    }
}

/// Ephemeral id allocator for synthetic nodes created by group expansion
///
/// Scratch ids count downward from below every id already present in the
/// workflow being expanded, so they can never alias a persisted object.
#[derive(Debug, Clone)]
pub struct ScratchIds {
    next: ObjectId,
}

impl ScratchIds {
    /// Create an allocator whose first id is strictly below `floor` and below zero
    pub fn below(floor: ObjectId) -> Self {
        Self {
            next: floor.min(0) - 1,
        }
    }

    /// Allocate the next scratch id
    pub fn next_id(&mut self) -> ObjectId {
        let id = self.next;
        self.next -= 1;
        id
    }
}

/// Mapping from original to copied ids, scoped to one copy operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemapContext {
    table: HashMap<ObjectKind, HashMap<ObjectId, ObjectId>>,
}

impl RemapContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id for `(kind, old)` in `scope` and record the mapping
    pub fn remap(&mut self, scope: &mut IdScope, kind: ObjectKind, old: ObjectId) -> ObjectId {
        let new = scope.get_new_id(kind);
        self.insert(kind, old, new);
        new
    }

    /// Record an explicit mapping
    pub fn insert(&mut self, kind: ObjectKind, old: ObjectId, new: ObjectId) {
        self.table
            .entry(kind.namespace())
            .or_default()
            .insert(old, new);
    }

    /// Look up the copy of `(kind, old)`, if one was made
    pub fn get(&self, kind: ObjectKind, old: ObjectId) -> Option<ObjectId> {
        self.table
            .get(&kind.namespace())
            .and_then(|ids| ids.get(&old))
            .copied()
    }

    /// Translate a reference: the copy's id if remapped, otherwise unchanged
    pub fn resolve(&self, kind: ObjectKind, id: ObjectId) -> ObjectId {
        self.get(kind, id).unwrap_or(id)
    }

    /// Number of remapped ids across all namespaces
    pub fn len(&self) -> usize {
        self.table.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increase_per_kind() {
        let mut scope = IdScope::new();
        let kinds = [
            ObjectKind::Module,
            ObjectKind::Function,
            ObjectKind::Module,
            ObjectKind::Parameter,
            ObjectKind::Function,
            ObjectKind::Module,
        ];

        let mut last: HashMap<ObjectKind, ObjectId> = HashMap::new();
        for kind in kinds.iter().cycle().take(60) {
            let id = scope.get_new_id(*kind);
            if let Some(prev) = last.insert(*kind, id) {
                assert!(id > prev, "{} ids must strictly increase", kind);
            }
        }
        assert_eq!(last[&ObjectKind::Parameter], 10);
    }

    #[test]
    fn test_group_shares_module_namespace() {
        let mut scope = IdScope::new();
        assert_eq!(scope.get_new_id(ObjectKind::Module), 1);
        assert_eq!(scope.get_new_id(ObjectKind::Group), 2);
        assert_eq!(scope.get_new_id(ObjectKind::AbstractionRef), 3);
        assert_eq!(scope.get_new_id(ObjectKind::Connection), 1);
    }

    #[test]
    fn test_update_begin_id_only_raises() {
        let mut scope = IdScope::new();
        scope.update_begin_id(ObjectKind::Action, 10);
        assert_eq!(scope.get_new_id(ObjectKind::Action), 10);
        scope.update_begin_id(ObjectKind::Action, 3);
        assert_eq!(scope.get_new_id(ObjectKind::Action), 11);
        assert!(scope.is_allocated(ObjectKind::Action, 11));
        assert!(!scope.is_allocated(ObjectKind::Action, 12));
        assert!(!scope.is_allocated(ObjectKind::Action, 0));
    }

    #[test]
    fn test_scratch_ids_stay_below_floor() {
        let mut scratch = ScratchIds::below(-7);
        assert_eq!(scratch.next_id(), -8);
        assert_eq!(scratch.next_id(), -9);

        let mut scratch = ScratchIds::below(5);
        assert_eq!(scratch.next_id(), -1);
    }

    #[test]
    fn test_remap_context() {
        let mut scope = IdScope::new();
        scope.update_begin_id(ObjectKind::Module, 20);
        let mut remap = RemapContext::new();

        let new = remap.remap(&mut scope, ObjectKind::Group, 4);
        assert_eq!(new, 20);
        assert_eq!(remap.get(ObjectKind::Module, 4), Some(20));
        assert_eq!(remap.resolve(ObjectKind::Module, 5), 5);
        assert_eq!(remap.len(), 1);
    }
}
