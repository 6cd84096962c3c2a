//! Fork reconciliation
//!
//! A fork is a copy of a log edited independently (see
//! [`Vistrail::fork`]). [`synchronize`] folds the fork's recorded changes
//! back into the canonical log. Ids allocated in the fork may already be
//! taken in canonical, so every copied action is renumbered through a
//! [`RemapContext`] before it is appended.
//!
//! Annotation and tag disagreements never abort a merge. They are resolved
//! by a fixed rule and reported as [`SyncConflict`] values.

use std::fmt;

use serde::Serialize;

use crate::action::{Action, ActionId, Tag};
use crate::error::{ProvenanceError, Result};
use crate::ids::{ObjectId, ObjectKind, RemapContext};
use crate::operation::{AddOp, ChangeOp, DeleteOp, Entity, Operation, ParentRef};
use crate::types::{Annotation, Function, Module, Port};
use crate::vistrail::Vistrail;

/// A disagreement between canonical and fork that was resolved automatically
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncConflict {
    /// Both sides edited the annotation `key` of a shared action; the fork's
    /// value wins (`None` means removed)
    Annotation {
        action_id: ActionId,
        key: String,
        canonical: Option<String>,
        fork: Option<String>,
    },
    /// The fork's tag clashes with an existing tag by name or by version;
    /// the existing tag is kept
    Tag { existing: Tag, rejected: Tag },
}

impl fmt::Display for SyncConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncConflict::Annotation {
                action_id,
                key,
                canonical,
                fork,
            } => write!(
                f,
                "Annotation '{}' of action {}: canonical {:?}, fork {:?}",
                key, action_id, canonical, fork
            ),
            SyncConflict::Tag { existing, rejected } => write!(
                f,
                "Tag '{}' on {} rejected: '{}' already names {}",
                rejected.name, rejected.action_id, existing.name, existing.action_id
            ),
        }
    }
}

/// Outcome of a [`synchronize`] call
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub conflicts: Vec<SyncConflict>,
    /// Fork ids and the canonical ids they were copied under
    pub remap: RemapContext,
    /// `(fork action id, canonical action id)` in copy order
    pub copied_actions: Vec<(ActionId, ActionId)>,
}

impl SyncReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    fn conflict(&mut self, conflict: SyncConflict) {
        log::warn!("Sync conflict: {}", conflict);
        self.conflicts.push(conflict);
    }
}

/// Merge everything `fork` changed since it was split off into `canonical`
pub fn synchronize(canonical: &mut Vistrail, fork: &Vistrail) -> Result<SyncReport> {
    let changes = fork.changes();
    let mut report = SyncReport::default();

    // =========================================================================
    // New actions
    // =========================================================================

    let mut copier = ActionCopier {
        log: canonical,
        remap: RemapContext::new(),
    };
    for &fork_id in &changes.new_actions {
        let action = fork
            .action(fork_id)
            .ok_or(ProvenanceError::UnknownVersion(fork_id))?;
        let copy = copier.copy_action(action);
        let id = copier.log.add_action(copy)?;
        report.copied_actions.push((fork_id, id));
    }
    report.remap = copier.remap;

    // =========================================================================
    // Annotations on shared actions
    // =========================================================================

    for (action_id, annotation) in &changes.deleted_annotations {
        let Some(action) = canonical.action(*action_id) else {
            log::warn!("Skipping annotation delete on unknown action {}", action_id);
            continue;
        };
        if action.annotations.iter().any(|a| a.id == annotation.id) {
            canonical.delete_action_annotation(*action_id, annotation.id)?;
            continue;
        }
        let current = action.annotation_by_key(&annotation.key).cloned();
        if let Some(current) = &current {
            canonical.delete_action_annotation(*action_id, current.id)?;
        }
        report.conflict(SyncConflict::Annotation {
            action_id: *action_id,
            key: annotation.key.clone(),
            canonical: current.map(|a| a.value),
            fork: None,
        });
    }

    for &(action_id, annotation_id) in &changes.added_annotations {
        let Some(annotation) = fork
            .action(action_id)
            .and_then(|a| a.annotations.iter().find(|n| n.id == annotation_id))
        else {
            continue;
        };
        let existing = canonical
            .action(action_id)
            .ok_or(ProvenanceError::UnknownVersion(action_id))?
            .annotation_by_key(&annotation.key)
            .cloned();
        match existing {
            Some(existing) if existing.value == annotation.value => continue,
            Some(existing) => report.conflict(SyncConflict::Annotation {
                action_id,
                key: annotation.key.clone(),
                canonical: Some(existing.value),
                fork: Some(annotation.value.clone()),
            }),
            None => {}
        }
        canonical.add_action_annotation(action_id, &annotation.key, &annotation.value)?;
    }

    // =========================================================================
    // Tags
    // =========================================================================

    for tag in &changes.deleted_tags {
        if canonical.tag(&tag.name) == Some(tag) {
            canonical.delete_tag(&tag.name);
        } else {
            log::debug!("Tag '{}' already gone from canonical", tag.name);
        }
    }

    for tag in &changes.added_tags {
        let wanted = Tag::new(tag.name.clone(), report.remap.resolve(ObjectKind::Action, tag.action_id));
        let existing = canonical
            .tag(&wanted.name)
            .or_else(|| canonical.tag_for_version(wanted.action_id))
            .cloned();
        match existing {
            Some(existing) if existing == wanted => {}
            Some(existing) => report.conflict(SyncConflict::Tag {
                existing,
                rejected: wanted,
            }),
            None => canonical.add_tag(&wanted.name, wanted.action_id)?,
        }
    }

    let fork_current = fork.current_version();
    if changes.is_new_action(fork_current) {
        canonical.set_current_version(report.remap.resolve(ObjectKind::Action, fork_current))?;
    }

    log::debug!(
        "Synchronized fork {} into '{}': {} actions, {} conflicts",
        fork.id,
        canonical.name,
        report.copied_actions.len(),
        report.conflicts.len()
    );
    Ok(report)
}

/// Renumbers fork actions into the canonical id scope
struct ActionCopier<'a> {
    log: &'a mut Vistrail,
    remap: RemapContext,
}

impl ActionCopier<'_> {
    fn fresh(&mut self, kind: ObjectKind, old: ObjectId) -> ObjectId {
        let new = self.log.get_new_id(kind);
        self.remap.insert(kind, old, new);
        new
    }

    fn parent(&self, parent: Option<ParentRef>) -> Option<ParentRef> {
        parent.map(|p| ParentRef {
            id: self.remap.resolve(p.kind, p.id),
            ..p
        })
    }

    fn copy_action(&mut self, action: &Action) -> Action {
        let id = self.fresh(ObjectKind::Action, action.id);
        let prev_id = self.remap.resolve(ObjectKind::Action, action.prev_id);

        let mut operations = Vec::with_capacity(action.operations.len());
        for op in &action.operations {
            let op_id = self.fresh(ObjectKind::Operation, op.id());
            operations.push(match op {
                Operation::Add(add) => {
                    let parent = self.parent(add.parent);
                    let mut data = add.data.clone();
                    self.entity(&mut data);
                    Operation::Add(AddOp {
                        id: op_id,
                        data,
                        parent,
                    })
                }
                Operation::Delete(delete) => Operation::Delete(DeleteOp {
                    id: op_id,
                    what: delete.what,
                    old_id: self.remap.resolve(delete.what, delete.old_id),
                    parent: self.parent(delete.parent),
                }),
                Operation::Change(change) => {
                    let old_id = self.remap.resolve(change.data.kind(), change.old_id);
                    let parent = self.parent(change.parent);
                    let mut data = change.data.clone();
                    self.entity(&mut data);
                    Operation::Change(ChangeOp {
                        id: op_id,
                        old_id,
                        data,
                        parent,
                    })
                }
            });
        }

        let annotations = action
            .annotations
            .iter()
            .map(|a| Annotation {
                id: self.fresh(ObjectKind::Annotation, a.id),
                ..a.clone()
            })
            .collect();

        log::debug!("Copying fork action {} as {} on {}", action.id, id, prev_id);
        Action {
            id,
            prev_id,
            operations,
            annotations,
            ..action.clone()
        }
    }

    fn entity(&mut self, entity: &mut Entity) {
        match entity {
            Entity::Module(module) => self.module(module),
            Entity::Connection(connection) => {
                connection.id = self.fresh(ObjectKind::Connection, connection.id);
                for port in &mut connection.ports {
                    self.port(port);
                }
            }
            Entity::Port(port) => self.port(port),
            Entity::Function(function) => self.function(function),
            Entity::Parameter(p) => p.id = self.fresh(ObjectKind::Parameter, p.id),
            Entity::Annotation(a) => a.id = self.fresh(ObjectKind::Annotation, a.id),
            Entity::Location(l) => l.id = self.fresh(ObjectKind::Location, l.id),
            Entity::PortSpec(s) => s.id = self.fresh(ObjectKind::PortSpec, s.id),
            Entity::Other(o) => o.id = self.fresh(ObjectKind::Other, o.id),
        }
    }

    // Fresh ids ascend in iteration order, so (pos, id) orderings survive.
    fn module(&mut self, module: &mut Module) {
        module.id = self.fresh(module.object_kind(), module.id);
        if let Some(location) = &mut module.location {
            location.id = self.fresh(ObjectKind::Location, location.id);
        }
        for function in &mut module.functions {
            self.function(function);
        }
        for annotation in &mut module.annotations {
            annotation.id = self.fresh(ObjectKind::Annotation, annotation.id);
        }
        for spec in &mut module.port_specs {
            spec.id = self.fresh(ObjectKind::PortSpec, spec.id);
        }
    }

    fn function(&mut self, function: &mut Function) {
        function.id = self.fresh(ObjectKind::Function, function.id);
        for parameter in &mut function.parameters {
            parameter.id = self.fresh(ObjectKind::Parameter, parameter.id);
        }
    }

    fn port(&mut self, port: &mut Port) {
        port.id = self.fresh(ObjectKind::Port, port.id);
        port.module_id = self.remap.resolve(ObjectKind::Module, port.module_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ROOT_VERSION;
    use crate::builder::PortEnd;
    use crate::test_support::init_logging;

    fn base() -> (Vistrail, ActionId, ObjectId) {
        init_logging();
        let mut log = Vistrail::new("canonical");
        let mut b = log.begin_action(ROOT_VERSION);
        let reader = b.add_module("Reader", "basic");
        b.annotate("notes", "first");
        let v1 = b.commit().unwrap();
        log.take_changes();
        (log, v1, reader)
    }

    fn names(workflow: &crate::types::Workflow) -> Vec<String> {
        let mut names: Vec<_> = workflow.modules.values().map(|m| m.name.clone()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_fork_actions_are_remapped() {
        let (mut canonical, v1, reader) = base();
        let mut fork = canonical.fork();

        let mut b = canonical.begin_action(v1);
        b.add_module("Writer", "basic");
        let canonical_v2 = b.commit().unwrap();

        let mut b = fork.begin_action(v1);
        let filter = b.add_module("Filter", "basic");
        b.add_function(filter, "expr", &[("String", "x > 1")]);
        let fork_v2 = b.commit().unwrap();
        let mut b = fork.begin_action(fork_v2);
        b.connect(
            PortEnd::new(reader, "Reader", "value"),
            PortEnd::new(filter, "Filter", "value"),
        );
        let fork_v3 = b.commit().unwrap();
        assert_eq!(fork_v2, canonical_v2);

        let report = synchronize(&mut canonical, &fork).unwrap();
        assert!(!report.has_conflicts());
        assert_eq!(report.copied_actions.len(), 2);

        let copied_v2 = report.remap.get(ObjectKind::Action, fork_v2).unwrap();
        let copied_v3 = report.remap.get(ObjectKind::Action, fork_v3).unwrap();
        assert_ne!(copied_v2, canonical_v2);
        assert_eq!(canonical.parent(copied_v3).unwrap(), copied_v2);
        assert_eq!(canonical.parent(copied_v2).unwrap(), v1);

        let merged = canonical.materialize(copied_v3).unwrap();
        assert_eq!(names(&merged), vec!["Filter", "Reader"]);
        let new_filter = report.remap.get(ObjectKind::Module, filter).unwrap();
        let connection = merged.connections.values().next().unwrap();
        assert_eq!(connection.source().unwrap().module_id, reader);
        assert_eq!(connection.destination().unwrap().module_id, new_filter);
        assert_eq!(
            merged.module(new_filter).unwrap().function_by_name("expr").unwrap().first_value(),
            Some("x > 1")
        );

        assert_eq!(names(&canonical.materialize(canonical_v2).unwrap()), vec!["Reader", "Writer"]);
        assert_eq!(canonical.current_version(), copied_v3);
    }

    #[test]
    fn test_annotation_conflicts() {
        let (mut canonical, v1, _) = base();
        let mut fork = canonical.fork();

        canonical.add_action_annotation(v1, "notes", "canonical edit").unwrap();
        canonical.add_action_annotation(v1, "owner", "alice").unwrap();
        fork.add_action_annotation(v1, "notes", "fork edit").unwrap();
        fork.add_action_annotation(v1, "owner", "bob").unwrap();

        let report = synchronize(&mut canonical, &fork).unwrap();
        assert_eq!(report.conflicts.len(), 2);
        assert_eq!(
            report.conflicts[0],
            SyncConflict::Annotation {
                action_id: v1,
                key: "notes".to_string(),
                canonical: Some("canonical edit".to_string()),
                fork: None,
            }
        );
        assert!(matches!(
            &report.conflicts[1],
            SyncConflict::Annotation { key, fork: Some(value), .. } if key == "owner" && value == "bob"
        ));

        let action = canonical.action(v1).unwrap();
        assert_eq!(action.annotations.len(), 2);
        assert_eq!(action.annotation_by_key("notes").unwrap().value, "fork edit");
        assert_eq!(action.annotation_by_key("owner").unwrap().value, "bob");
    }

    #[test]
    fn test_same_annotation_is_not_a_conflict() {
        let (mut canonical, v1, _) = base();
        let mut fork = canonical.fork();
        canonical.add_action_annotation(v1, "status", "done").unwrap();
        fork.add_action_annotation(v1, "status", "done").unwrap();

        let report = synchronize(&mut canonical, &fork).unwrap();
        assert!(report.conflicts.is_empty());
        assert_eq!(canonical.action(v1).unwrap().annotations.len(), 2);
    }

    #[test]
    fn test_tag_conflicts_keep_existing() {
        let (mut canonical, v1, _) = base();
        let mut b = canonical.begin_action(v1);
        b.add_module("Writer", "basic");
        let v2 = b.commit().unwrap();
        canonical.add_tag("stale", v1).unwrap();
        canonical.take_changes();

        let mut fork = canonical.fork();
        canonical.add_tag("release", v2).unwrap();
        fork.delete_tag("stale");
        fork.add_tag("release", v1).unwrap();
        fork.add_tag("beta", v2).unwrap();
        let mut b = fork.begin_action(v2);
        b.add_module("Filter", "basic");
        let fork_v3 = b.commit().unwrap();
        fork.add_tag("nightly", fork_v3).unwrap();

        let report = synchronize(&mut canonical, &fork).unwrap();
        assert_eq!(
            report.conflicts,
            vec![
                SyncConflict::Tag {
                    existing: Tag::new("release", v2),
                    rejected: Tag::new("release", v1),
                },
                SyncConflict::Tag {
                    existing: Tag::new("release", v2),
                    rejected: Tag::new("beta", v2),
                },
            ]
        );
        assert!(canonical.tag("stale").is_none());
        assert_eq!(canonical.tag("release").unwrap().action_id, v2);
        let copied = report.remap.get(ObjectKind::Action, fork_v3).unwrap();
        assert_eq!(canonical.tag("nightly").unwrap().action_id, copied);
    }

    #[test]
    fn test_current_version_stays_when_fork_did_not_move() {
        let (mut canonical, v1, _) = base();
        let fork = canonical.fork();
        let mut b = canonical.begin_action(v1);
        b.add_module("Writer", "basic");
        let v2 = b.commit().unwrap();

        let report = synchronize(&mut canonical, &fork).unwrap();
        assert!(report.copied_actions.is_empty());
        assert!(report.remap.is_empty());
        assert_eq!(canonical.current_version(), v2);
    }

    #[test]
    fn test_fork_annotation_delete_is_applied() {
        let (mut canonical, v1, _) = base();
        let mut fork = canonical.fork();
        canonical.add_action_annotation(v1, "owner", "alice").unwrap();

        let notes = fork.action(v1).unwrap().annotation_by_key("notes").unwrap().id;
        fork.delete_action_annotation(v1, notes).unwrap();

        let report = synchronize(&mut canonical, &fork).unwrap();
        assert!(!report.has_conflicts());
        let action = canonical.action(v1).unwrap();
        assert!(action.annotation_by_key("notes").is_none());
        assert_eq!(action.annotation_by_key("owner").unwrap().value, "alice");
    }
}
