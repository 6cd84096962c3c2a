//! The action log
//!
//! A [`Vistrail`] is the version tree of one workflow: actions linked by
//! their `prev_id`, tags naming versions, nested abstraction logs, and the
//! id scope every new object is allocated from.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::{Action, ActionId, Tag, ROOT_VERSION};
use crate::builder::ActionBuilder;
use crate::changeset::ChangeSet;
use crate::error::{ProvenanceError, Result};
use crate::ids::{IdScope, ObjectId, ObjectKind};
use crate::materialize;
use crate::operation::{check_parent, OpKey};
use crate::types::{Annotation, Workflow};

/// A version tree of workflow edits
///
/// Not `Clone`: cached snapshots are keyed by the log's `id`, so a copy
/// that diverges must come from [`Vistrail::fork`], which assigns a new one.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vistrail {
    pub id: Uuid,
    pub name: String,
    id_scope: IdScope,
    actions: BTreeMap<ActionId, Action>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    abstractions: BTreeMap<ObjectId, Vistrail>,
    #[serde(default)]
    current_version: ActionId,
    /// Every object id introduced by an Add/Change in this log
    #[serde(skip)]
    introduced: HashSet<OpKey>,
    #[serde(skip)]
    changes: ChangeSet,
}

impl Vistrail {
    /// Create an empty log
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            id_scope: IdScope::new(),
            actions: BTreeMap::new(),
            tags: Vec::new(),
            abstractions: BTreeMap::new(),
            current_version: ROOT_VERSION,
            introduced: HashSet::new(),
            changes: ChangeSet::new(),
        }
    }

    // =========================================================================
    // Ids
    // =========================================================================

    pub fn id_scope(&self) -> &IdScope {
        &self.id_scope
    }

    /// Allocate a fresh id from this log's scope
    pub fn get_new_id(&mut self, kind: ObjectKind) -> ObjectId {
        self.id_scope.get_new_id(kind)
    }

    /// Rebuild derived indices after bulk-loading a log
    ///
    /// Raises every scope counter past the ids already used so future
    /// allocations never collide. Fails if some action's parent chain does
    /// not reach the root (a missing parent or a `prev_id` cycle).
    pub fn reindex(&mut self) -> Result<()> {
        self.check_rooted()?;
        self.introduced.clear();
        let mut floors: Vec<(ObjectKind, ObjectId)> = Vec::new();
        for action in self.actions.values() {
            floors.push((ObjectKind::Action, action.id));
            for op in &action.operations {
                floors.push((ObjectKind::Operation, op.id()));
                if let Some(data) = op.data() {
                    for (kind, id) in data.introduced_ids() {
                        self.introduced.insert(OpKey::new(kind, id));
                        floors.push((kind, id));
                    }
                }
            }
            floors.extend(action.annotations.iter().map(|a| (ObjectKind::Annotation, a.id)));
        }
        for (kind, id) in floors {
            self.id_scope.update_begin_id(kind, id + 1);
        }
        for abstraction in self.abstractions.values_mut() {
            abstraction.reindex()?;
        }
        Ok(())
    }

    fn check_rooted(&self) -> Result<()> {
        let mut rooted: HashSet<ActionId> = HashSet::new();
        for &start in self.actions.keys() {
            let mut path = HashSet::new();
            let mut current = start;
            while current != ROOT_VERSION && !rooted.contains(&current) {
                if !path.insert(current) {
                    return Err(ProvenanceError::NotAnAncestor {
                        ancestor: ROOT_VERSION,
                        descendant: start,
                    });
                }
                current = self.parent(current)?;
            }
            rooted.extend(path);
        }
        Ok(())
    }

    // =========================================================================
    // Version tree
    // =========================================================================

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(&id)
    }

    /// All actions in ascending id order
    pub fn actions(&self) -> impl Iterator<Item = &Action> + '_ {
        self.actions.values()
    }

    /// Whether `version` names a state of this log (the root always does)
    pub fn has_version(&self, version: ActionId) -> bool {
        version == ROOT_VERSION || self.actions.contains_key(&version)
    }

    fn require(&self, version: ActionId) -> Result<&Action> {
        self.actions
            .get(&version)
            .ok_or(ProvenanceError::UnknownVersion(version))
    }

    /// Parent version of `version`
    pub fn parent(&self, version: ActionId) -> Result<ActionId> {
        Ok(self.require(version)?.prev_id)
    }

    /// Direct children of `version`, ascending
    pub fn children(&self, version: ActionId) -> Vec<ActionId> {
        self.actions
            .values()
            .filter(|a| a.prev_id == version)
            .map(|a| a.id)
            .collect()
    }

    /// Number of actions between the root and `version`
    pub fn depth(&self, version: ActionId) -> Result<usize> {
        let mut depth = 0;
        let mut current = version;
        while current != ROOT_VERSION {
            current = self.parent(current)?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Actions from the root down to `version`, root-first
    pub fn action_chain(&self, version: ActionId) -> Result<Vec<&Action>> {
        self.actions_between(ROOT_VERSION, version)
    }

    /// Actions after `ancestor` down to `descendant`, oldest first
    pub fn actions_between(&self, ancestor: ActionId, descendant: ActionId) -> Result<Vec<&Action>> {
        if !self.has_version(ancestor) {
            return Err(ProvenanceError::UnknownVersion(ancestor));
        }
        let mut chain = Vec::new();
        let mut current = descendant;
        while current != ancestor {
            if current == ROOT_VERSION {
                return Err(ProvenanceError::NotAnAncestor {
                    ancestor,
                    descendant,
                });
            }
            let action = self.require(current)?;
            chain.push(action);
            current = action.prev_id;
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn current_version(&self) -> ActionId {
        self.current_version
    }

    pub fn set_current_version(&mut self, version: ActionId) -> Result<()> {
        if !self.has_version(version) {
            return Err(ProvenanceError::UnknownVersion(version));
        }
        self.current_version = version;
        Ok(())
    }

    /// Start recording a new action on top of `prev_id`
    pub fn begin_action(&mut self, prev_id: ActionId) -> ActionBuilder<'_> {
        ActionBuilder::new(self, prev_id)
    }

    /// Append an action to the log
    ///
    /// Fails with `UnknownVersion` if the parent is missing, and with
    /// `IdCollision` if the action id or any object id it introduces is
    /// already in use. Non-positive object ids come from group expansion and
    /// are rejected.
    pub fn add_action(&mut self, action: Action) -> Result<ActionId> {
        if action.id <= ROOT_VERSION || self.actions.contains_key(&action.id) {
            return Err(ProvenanceError::collision(ObjectKind::Action, action.id));
        }
        if !self.has_version(action.prev_id) {
            return Err(ProvenanceError::UnknownVersion(action.prev_id));
        }

        let mut introduced = Vec::new();
        for op in &action.operations {
            check_parent(op.what(), op.parent().as_ref())?;
            let Some(data) = op.data() else { continue };
            for (kind, id) in data.introduced_ids() {
                if id <= 0 {
                    return Err(ProvenanceError::ScratchIdInLog { kind, id });
                }
                let key = OpKey::new(kind, id);
                if self.introduced.contains(&key) || introduced.contains(&key) {
                    return Err(ProvenanceError::collision(kind, id));
                }
                introduced.push(key);
            }
        }

        for key in &introduced {
            self.id_scope.update_begin_id(key.kind, key.id + 1);
        }
        self.introduced.extend(introduced);
        self.id_scope.update_begin_id(ObjectKind::Action, action.id + 1);
        for op in &action.operations {
            self.id_scope.update_begin_id(ObjectKind::Operation, op.id() + 1);
        }
        for annotation in &action.annotations {
            self.id_scope
                .update_begin_id(ObjectKind::Annotation, annotation.id + 1);
        }

        let id = action.id;
        log::debug!(
            "Log '{}': appended action {} on {} ({} operations)",
            self.name,
            id,
            action.prev_id,
            action.operations.len()
        );
        self.actions.insert(id, action);
        self.changes.record_action(id);
        Ok(id)
    }

    /// Materialize the workflow at `version`
    pub fn materialize(&self, version: ActionId) -> Result<Workflow> {
        materialize::materialize(self, version)
    }

    // =========================================================================
    // Action annotations
    // =========================================================================

    /// Annotate an existing action, replacing any annotation with the same key
    pub fn add_action_annotation(&mut self, version: ActionId, key: &str, value: &str) -> Result<ObjectId> {
        self.require(version)?;
        let id = self.id_scope.get_new_id(ObjectKind::Annotation);
        let existing = self
            .require(version)?
            .annotation_by_key(key)
            .map(|a| a.id);
        if let Some(old) = existing {
            self.delete_action_annotation(version, old)?;
        }
        self.insert_action_annotation(version, Annotation::new(id, key, value))?;
        Ok(id)
    }

    /// Remove an annotation from an action
    pub fn delete_action_annotation(&mut self, version: ActionId, annotation_id: ObjectId) -> Result<Annotation> {
        let action = self
            .actions
            .get_mut(&version)
            .ok_or(ProvenanceError::UnknownVersion(version))?;
        let pos = action
            .annotations
            .iter()
            .position(|a| a.id == annotation_id)
            .ok_or_else(|| ProvenanceError::missing(ObjectKind::Annotation, annotation_id))?;
        let removed = action.annotations.remove(pos);
        self.changes
            .record_annotation_deleted(version, removed.clone());
        Ok(removed)
    }

    pub(crate) fn insert_action_annotation(&mut self, version: ActionId, annotation: Annotation) -> Result<()> {
        let action = self
            .actions
            .get_mut(&version)
            .ok_or(ProvenanceError::UnknownVersion(version))?;
        if action.annotations.iter().any(|a| a.id == annotation.id) {
            return Err(ProvenanceError::collision(ObjectKind::Annotation, annotation.id));
        }
        self.id_scope
            .update_begin_id(ObjectKind::Annotation, annotation.id + 1);
        self.changes.record_annotation_added(version, annotation.id);
        action.annotations.push(annotation);
        Ok(())
    }

    // =========================================================================
    // Tags
    // =========================================================================

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    pub fn tag_for_version(&self, version: ActionId) -> Option<&Tag> {
        self.tags.iter().find(|t| t.action_id == version)
    }

    /// Name `version`; names and tagged versions are both unique
    pub fn add_tag(&mut self, name: &str, version: ActionId) -> Result<()> {
        self.require(version)?;
        if self.tag(name).is_some() || self.tag_for_version(version).is_some() {
            return Err(ProvenanceError::DuplicateTag {
                name: name.to_string(),
                version,
            });
        }
        let tag = Tag::new(name, version);
        self.changes.record_tag_added(tag.clone());
        self.tags.push(tag);
        Ok(())
    }

    /// Remove the tag called `name`
    pub fn delete_tag(&mut self, name: &str) -> Option<Tag> {
        let pos = self.tags.iter().position(|t| t.name == name)?;
        let tag = self.tags.remove(pos);
        self.changes.record_tag_deleted(tag.clone());
        Some(tag)
    }

    // =========================================================================
    // Abstractions
    // =========================================================================

    /// Register a nested abstraction log under `id`
    pub fn add_abstraction(&mut self, id: ObjectId, abstraction: Vistrail) -> Result<()> {
        if self.abstractions.contains_key(&id) {
            return Err(ProvenanceError::collision(ObjectKind::AbstractionRef, id));
        }
        self.abstractions.insert(id, abstraction);
        Ok(())
    }

    pub fn abstraction(&self, id: ObjectId) -> Option<&Vistrail> {
        self.abstractions.get(&id)
    }

    /// Nested abstraction logs, ascending by id
    pub fn abstractions(&self) -> impl Iterator<Item = &Vistrail> + '_ {
        self.abstractions.values()
    }

    // =========================================================================
    // Changes and forks
    // =========================================================================

    /// Changes recorded since the last save or fork
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Hand the pending changes to a persistence layer and start afresh
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Copy this log for independent editing
    ///
    /// The fork gets a new identity, an empty change set, and a copy of the
    /// id scope, so its allocations start past this log's high-water mark.
    /// Nested abstraction logs are forked too.
    pub fn fork(&self) -> Vistrail {
        let fork = Vistrail {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            id_scope: self.id_scope.clone(),
            actions: self.actions.clone(),
            tags: self.tags.clone(),
            abstractions: self
                .abstractions
                .iter()
                .map(|(&id, abstraction)| (id, abstraction.fork()))
                .collect(),
            current_version: self.current_version,
            introduced: self.introduced.clone(),
            changes: ChangeSet::new(),
        };
        log::debug!("Forked log '{}' as {}", self.name, fork.id);
        fork
    }
}
