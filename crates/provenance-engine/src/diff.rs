//! Diff engine
//!
//! Two arbitrary versions are compared through their nearest common
//! ancestor: each branch's actions beyond that root are folded against the
//! root's live operations into an add dict and a delete dict, and the two
//! resulting workflows are partitioned into shared, changed and one-sided
//! objects. Optional heuristic matching re-pairs objects that were deleted
//! and re-created with the same structure on different branches.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::action::{Action, ActionId, ROOT_VERSION};
use crate::error::Result;
use crate::heuristic::{
    best_candidate, heuristic_connection_match, heuristic_module_match, heuristic_parameter_match,
    MatchScore,
};
use crate::ids::ObjectId;
use crate::materialize::{
    build_workflow, contains_object, current_operation_dict, current_operations, find_object,
    remove_orphans, remove_subtree, subtree_keys, OperationDict,
};
use crate::operation::{DeleteOp, OpKey};
use crate::types::{Function, Module, Workflow};
use crate::vistrail::Vistrail;

/// Net additions of a branch, keyed like an [`OperationDict`]
pub type AddDict = OperationDict;

/// Net deletions of base objects by a branch
pub type DeleteDict = BTreeMap<OpKey, DeleteOp>;

/// Nearest common ancestor of `versions`
///
/// Walks predecessor chains, always stepping back the deepest version in
/// the frontier (ties go to the larger id) until every entry coincides.
/// Depth rather than id order drives the walk, so logs whose ids do not grow
/// with depth (merged forks) still resolve to the true ancestor.
pub fn shared_root(vistrail: &Vistrail, versions: &[ActionId]) -> Result<ActionId> {
    let mut frontier = versions
        .iter()
        .map(|&v| Ok((vistrail.depth(v)?, v)))
        .collect::<Result<Vec<(usize, ActionId)>>>()?;

    loop {
        let Some(&(_, first)) = frontier.first() else {
            return Ok(ROOT_VERSION);
        };
        if frontier.iter().all(|&(_, v)| v == first) {
            return Ok(first);
        }
        let Some(deepest) = frontier.iter_mut().max() else {
            return Ok(ROOT_VERSION);
        };
        deepest.1 = vistrail.parent(deepest.1)?;
        deepest.0 -= 1;
    }
}

/// Net effect of `actions` relative to the live operations `base`
///
/// An add followed by a delete inside the branch cancels out. Deleting a
/// base object also records its base descendants that are separate entries
/// (so an inverse can restore them), and cancels branch additions that hang
/// off the removed subtree.
pub fn operation_diff<'a, I>(actions: I, base: &OperationDict) -> (AddDict, DeleteDict)
where
    I: IntoIterator<Item = &'a Action>,
{
    let mut adds = AddDict::new();
    let mut deletes = DeleteDict::new();

    for action in actions {
        for op in &action.operations {
            if let Some(old) = op.old_key() {
                remove_from_branch(&mut adds, &mut deletes, base, old, op.id());
            }
            if let Some(new) = op.new_key() {
                adds.insert(new, op.clone());
            }
        }
    }
    (adds, deletes)
}

fn remove_from_branch(
    adds: &mut AddDict,
    deletes: &mut DeleteDict,
    base: &OperationDict,
    key: OpKey,
    op_id: ObjectId,
) {
    if remove_subtree(adds, key).is_some() {
        return;
    }
    if deletes.contains_key(&key) || !contains_object(base, key) {
        log::warn!("Ignoring removal of {:?}: not live on this branch", key);
        return;
    }

    let subtree = subtree_keys(base, key);
    // Restoring the subtree root restores everything embedded in it.
    deletes.retain(|k, _| !subtree.contains(k));
    let mut removed: Vec<OpKey> = vec![key];
    removed.extend(
        base.keys()
            .filter(|k| **k != key && subtree.contains(k))
            .copied(),
    );
    for k in removed {
        if let Some((data, parent)) = find_object(base, k) {
            deletes.insert(
                k,
                DeleteOp {
                    id: op_id,
                    what: data.kind(),
                    old_id: k.id,
                    parent,
                },
            );
        }
    }
    remove_orphans(adds, &subtree);
}

/// Before/after pair of a function that differs between two modules
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionChange {
    pub v1: Option<Function>,
    pub v2: Option<Function>,
}

/// A module present on both sides whose functions differ
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleChange {
    pub v1_id: ObjectId,
    pub v2_id: ObjectId,
    pub functions: Vec<FunctionChange>,
}

/// Structural comparison of two versions
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDiff {
    pub shared_root: ActionId,
    pub v1: Workflow,
    pub v2: Workflow,
    /// Module pairs `(v1 id, v2 id)` that are the same on both sides
    pub shared_modules: Vec<(ObjectId, ObjectId)>,
    pub param_changed: Vec<ModuleChange>,
    pub v1_only_modules: Vec<ObjectId>,
    pub v2_only_modules: Vec<ObjectId>,
    /// Subset of the pairs above found by heuristic matching
    pub heuristic_modules: Vec<(ObjectId, ObjectId)>,
    pub shared_connections: Vec<(ObjectId, ObjectId)>,
    pub heuristic_connections: Vec<(ObjectId, ObjectId)>,
    pub v1_only_connections: Vec<ObjectId>,
    pub v2_only_connections: Vec<ObjectId>,
}

impl WorkflowDiff {
    /// Whether the two sides hold the same modules and connections
    pub fn is_unchanged(&self) -> bool {
        self.param_changed.is_empty()
            && self.v1_only_modules.is_empty()
            && self.v2_only_modules.is_empty()
            && self.v1_only_connections.is_empty()
            && self.v2_only_connections.is_empty()
    }
}

/// Diff two versions of `vistrail`
pub fn workflow_diff(
    vistrail: &Vistrail,
    v1: ActionId,
    v2: ActionId,
    heuristic_match: bool,
) -> Result<WorkflowDiff> {
    let root = shared_root(vistrail, &[v1, v2])?;
    let base = current_operations(vistrail, root)?;
    let branch1 = vistrail.actions_between(root, v1)?;
    let branch2 = vistrail.actions_between(root, v2)?;

    let mut diff = WorkflowDiff {
        shared_root: root,
        v1: build_workflow(&current_operation_dict(branch1, &base))?,
        v2: build_workflow(&current_operation_dict(branch2, &base))?,
        ..WorkflowDiff::default()
    };
    partition_modules(&mut diff);
    if heuristic_match {
        match_modules(&mut diff);
    }
    partition_connections(&mut diff, heuristic_match);

    log::debug!(
        "Diff {} vs {} (root {}): {} shared, {} changed, {}/{} one-sided modules",
        v1,
        v2,
        root,
        diff.shared_modules.len(),
        diff.param_changed.len(),
        diff.v1_only_modules.len(),
        diff.v2_only_modules.len()
    );
    Ok(diff)
}

fn partition_modules(diff: &mut WorkflowDiff) {
    for (id, m1) in &diff.v1.modules {
        match diff.v2.module(*id) {
            Some(m2) => {
                let functions = function_changes(m1, m2);
                if functions.is_empty() {
                    diff.shared_modules.push((*id, *id));
                } else {
                    diff.param_changed.push(ModuleChange {
                        v1_id: *id,
                        v2_id: *id,
                        functions,
                    });
                }
            }
            None => diff.v1_only_modules.push(*id),
        }
    }
    diff.v2_only_modules = diff
        .v2
        .modules
        .keys()
        .filter(|id| !diff.v1.modules.contains_key(id))
        .copied()
        .collect();
}

fn match_modules(diff: &mut WorkflowDiff) {
    let mut v1_left = Vec::new();
    for id1 in std::mem::take(&mut diff.v1_only_modules) {
        let Some(m1) = diff.v1.module(id1) else { continue };
        let candidates: Vec<&Module> = diff
            .v2_only_modules
            .iter()
            .filter_map(|id| diff.v2.module(*id))
            .collect();
        let found = best_candidate(candidates, |m2| heuristic_module_match(m1, m2));

        match found {
            Some((m2, score)) => {
                let id2 = m2.id;
                if score == MatchScore::Exact {
                    diff.shared_modules.push((id1, id2));
                } else {
                    diff.param_changed.push(ModuleChange {
                        v1_id: id1,
                        v2_id: id2,
                        functions: function_changes(m1, m2),
                    });
                }
                diff.heuristic_modules.push((id1, id2));
                diff.v2_only_modules.retain(|id| *id != id2);
            }
            None => v1_left.push(id1),
        }
    }
    diff.v1_only_modules = v1_left;
}

fn partition_connections(diff: &mut WorkflowDiff, heuristic_match: bool) {
    let mut v1_left = Vec::new();
    for id in diff.v1.connections.keys() {
        if diff.v2.connections.contains_key(id) {
            diff.shared_connections.push((*id, *id));
        } else {
            v1_left.push(*id);
        }
    }
    let mut v2_left: Vec<ObjectId> = diff
        .v2
        .connections
        .keys()
        .filter(|id| !diff.v1.connections.contains_key(id))
        .copied()
        .collect();

    if heuristic_match {
        let module_pairs: HashMap<ObjectId, ObjectId> = diff
            .shared_modules
            .iter()
            .copied()
            .chain(diff.param_changed.iter().map(|c| (c.v1_id, c.v2_id)))
            .collect();
        let mut unmatched = Vec::new();
        for id1 in v1_left {
            let Some(c1) = diff.v1.connection(id1) else { continue };
            let candidates: Vec<_> = v2_left.iter().filter_map(|id| diff.v2.connection(*id)).collect();
            match best_candidate(candidates, |c2| heuristic_connection_match(c1, c2, &module_pairs)) {
                Some((c2, _)) => {
                    let id2 = c2.id;
                    diff.shared_connections.push((id1, id2));
                    diff.heuristic_connections.push((id1, id2));
                    v2_left.retain(|id| *id != id2);
                }
                None => unmatched.push(id1),
            }
        }
        v1_left = unmatched;
    }

    diff.v1_only_connections = v1_left;
    diff.v2_only_connections = v2_left;
}

/// Functions that differ between two versions of a module
///
/// Functions are paired by id first, then by name; a pair differs when
/// its parameters do not match by `(type, pos, value)`.
pub fn function_changes(m1: &Module, m2: &Module) -> Vec<FunctionChange> {
    let mut changes = Vec::new();
    let mut used: HashSet<ObjectId> = HashSet::new();
    let mut unpaired = Vec::new();

    for f1 in &m1.functions {
        match m2.function(f1.id) {
            Some(f2) => {
                used.insert(f2.id);
                if !same_parameters(f1, f2) {
                    changes.push(FunctionChange {
                        v1: Some(f1.clone()),
                        v2: Some(f2.clone()),
                    });
                }
            }
            None => unpaired.push(f1),
        }
    }
    for f1 in unpaired {
        let partner = m2
            .functions
            .iter()
            .find(|f2| !used.contains(&f2.id) && m1.function(f2.id).is_none() && f2.name == f1.name);
        match partner {
            Some(f2) => {
                used.insert(f2.id);
                if !same_parameters(f1, f2) {
                    changes.push(FunctionChange {
                        v1: Some(f1.clone()),
                        v2: Some(f2.clone()),
                    });
                }
            }
            None => changes.push(FunctionChange {
                v1: Some(f1.clone()),
                v2: None,
            }),
        }
    }
    for f2 in &m2.functions {
        if !used.contains(&f2.id) && m1.function(f2.id).is_none() {
            changes.push(FunctionChange {
                v1: None,
                v2: Some(f2.clone()),
            });
        }
    }
    changes
}

fn same_parameters(f1: &Function, f2: &Function) -> bool {
    f1.parameters.len() == f2.parameters.len()
        && f1
            .parameters
            .iter()
            .zip(&f2.parameters)
            .all(|(p1, p2)| heuristic_parameter_match(p1, p2) == MatchScore::Exact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PortEnd;
    use crate::error::ProvenanceError;
    use crate::ids::ObjectKind;
    use crate::test_support::branching_log;

    /// A0 (root) -> A1 (adds M1) -> { A2 (connects), A3 (adds M2) }
    fn scenario() -> (Vistrail, ActionId, ActionId, ActionId, ObjectId, ObjectId) {
        let mut log = Vistrail::new("scenario");
        let mut b = log.begin_action(ROOT_VERSION);
        let m1 = b.add_module("M1", "basic");
        let a1 = b.commit().unwrap();

        let mut b = log.begin_action(a1);
        b.connect(PortEnd::new(m1, "M1", "out"), PortEnd::new(m1, "M1", "in"));
        let a2 = b.commit().unwrap();

        let mut b = log.begin_action(a1);
        let m2 = b.add_module("M2", "basic");
        let a3 = b.commit().unwrap();
        (log, a1, a2, a3, m1, m2)
    }

    #[test]
    fn test_scenario_shared_root_and_partition() {
        let (log, a1, a2, a3, m1, m2) = scenario();
        assert_eq!(shared_root(&log, &[a2, a3]).unwrap(), a1);

        let diff = workflow_diff(&log, a2, a3, true).unwrap();
        assert_eq!(diff.shared_root, a1);
        assert_eq!(diff.shared_modules, vec![(m1, m1)]);
        assert_eq!(diff.v2_only_modules, vec![m2]);
        assert!(diff.v1_only_modules.is_empty());
        assert_eq!(diff.v1_only_connections.len(), 1);
        assert!(diff.v2_only_connections.is_empty());
    }

    #[test]
    fn test_self_diff_is_empty() {
        let (log, versions) = branching_log();
        for v in versions {
            let diff = workflow_diff(&log, v, v, true).unwrap();
            assert_eq!(diff.shared_root, v);
            assert!(diff.is_unchanged());
            assert!(diff.heuristic_modules.is_empty());

            let (adds, deletes) = operation_diff(Vec::<&Action>::new(), &current_operations(&log, v).unwrap());
            assert!(adds.is_empty() && deletes.is_empty());
        }
    }

    #[test]
    fn test_shared_root_multiple_branch_points() {
        // root -> a -> b -> c -> d
        //              \-> e
        //         \-> f -> g
        let mut log = Vistrail::new("tree");
        let mut step = |log: &mut Vistrail, prev| {
            let mut b = log.begin_action(prev);
            b.add_module("X", "basic");
            b.commit().unwrap()
        };
        let a = step(&mut log, ROOT_VERSION);
        let b = step(&mut log, a);
        let c = step(&mut log, b);
        let d = step(&mut log, c);
        let e = step(&mut log, b);
        let f = step(&mut log, a);
        let g = step(&mut log, f);

        assert_eq!(shared_root(&log, &[d, e]).unwrap(), b);
        assert_eq!(shared_root(&log, &[d, g]).unwrap(), a);
        assert_eq!(shared_root(&log, &[e, g, d]).unwrap(), a);
        assert_eq!(shared_root(&log, &[c, d]).unwrap(), c);
        assert_eq!(shared_root(&log, &[d]).unwrap(), d);
        assert_eq!(shared_root(&log, &[]).unwrap(), ROOT_VERSION);
        assert!(matches!(
            shared_root(&log, &[d, 77]),
            Err(ProvenanceError::UnknownVersion(77))
        ));
    }

    #[test]
    fn test_shared_root_uneven_depth_with_low_ids() {
        // A shallow branch created late (high id) and a deep branch whose
        // ids were appended out of depth order.
        let mut log = Vistrail::new("uneven");
        let a = log.get_new_id(ObjectKind::Action);
        log.add_action(Action::new(a, ROOT_VERSION, "u")).unwrap();
        let deep1 = log.get_new_id(ObjectKind::Action);
        log.add_action(Action::new(deep1, a, "u")).unwrap();
        let shallow = 50;
        log.add_action(Action::new(shallow, ROOT_VERSION, "u")).unwrap();
        let deep2 = 60;
        log.add_action(Action::new(deep2, deep1, "u")).unwrap();
        let deep3 = 61;
        log.add_action(Action::new(deep3, deep2, "u")).unwrap();

        assert_eq!(shared_root(&log, &[deep3, shallow]).unwrap(), ROOT_VERSION);
        assert_eq!(shared_root(&log, &[deep3, a]).unwrap(), a);
        assert_eq!(shared_root(&log, &[deep3, deep1]).unwrap(), deep1);
    }

    #[test]
    fn test_add_then_delete_is_invisible() {
        let mut log = Vistrail::new("cancel");
        let mut b = log.begin_action(ROOT_VERSION);
        b.add_module("Base", "basic");
        let v1 = b.commit().unwrap();

        let mut b = log.begin_action(v1);
        let tmp = b.add_module("Tmp", "basic");
        b.add_function(tmp, "value", &[("Integer", "1")]);
        let v2 = b.commit().unwrap();
        let mut b = log.begin_action(v2);
        b.delete(ObjectKind::Module, tmp, None);
        let v3 = b.commit().unwrap();

        let base = current_operations(&log, v1).unwrap();
        let (adds, deletes) = operation_diff(log.actions_between(v1, v3).unwrap(), &base);
        assert!(adds.is_empty(), "{:?}", adds);
        assert!(deletes.is_empty());
    }

    #[test]
    fn test_delete_of_base_records_descendants() {
        let (log, versions) = branching_log();
        let &[v1, _, _, v4, ..] = &versions[..] else {
            panic!("fixture has five versions")
        };
        let base = current_operations(&log, v1).unwrap();
        let (_, deletes) = operation_diff(log.actions_between(v1, v4).unwrap(), &base);
        // The writer is deleted on this branch; nothing embedded in it is
        // listed separately.
        assert!(deletes.values().all(|d| d.what != ObjectKind::Parameter));
        assert!(deletes.values().any(|d| d.what == ObjectKind::Module));
    }

    #[test]
    fn test_param_change_and_heuristic_pairing() {
        let mut log = Vistrail::new("heuristic");
        let mut b = log.begin_action(ROOT_VERSION);
        let reader = b.add_module("Reader", "basic");
        let fid = b.add_function(reader, "path", &[("String", "in.csv")]);
        let v1 = b.commit().unwrap();

        // Branch 1 edits the path in place.
        let mut b = log.begin_action(v1);
        b.change_function(reader, fid, "path", &[("String", "out.csv")]);
        let left = b.commit().unwrap();

        // Branch 2 deletes the reader and re-creates an identical one.
        let mut b = log.begin_action(v1);
        b.delete(ObjectKind::Module, reader, None);
        let copy = b.add_module("Reader", "basic");
        b.add_function(copy, "path", &[("String", "in.csv")]);
        let right = b.commit().unwrap();

        let diff = workflow_diff(&log, left, right, true).unwrap();
        assert_eq!(diff.heuristic_modules, vec![(reader, copy)]);
        assert_eq!(diff.param_changed.len(), 1);
        let change = &diff.param_changed[0];
        assert_eq!(change.functions.len(), 1);
        assert_eq!(change.functions[0].v1.as_ref().unwrap().first_value(), Some("out.csv"));
        assert_eq!(change.functions[0].v2.as_ref().unwrap().first_value(), Some("in.csv"));

        let plain = workflow_diff(&log, left, right, false).unwrap();
        assert_eq!(plain.v1_only_modules, vec![reader]);
        assert_eq!(plain.v2_only_modules, vec![copy]);
    }

    #[test]
    fn test_heuristic_connections_follow_module_pairs() {
        let mut log = Vistrail::new("connections");
        let mut b = log.begin_action(ROOT_VERSION);
        let src = b.add_module("Source", "basic");
        let dst = b.add_module("Sink", "basic");
        let v1 = b.commit().unwrap();

        let mut b = log.begin_action(v1);
        b.connect(PortEnd::new(src, "Source", "out"), PortEnd::new(dst, "Sink", "in"));
        let left = b.commit().unwrap();

        let mut b = log.begin_action(v1);
        b.connect(PortEnd::new(src, "Source", "out"), PortEnd::new(dst, "Sink", "in"));
        let right = b.commit().unwrap();

        let diff = workflow_diff(&log, left, right, true).unwrap();
        assert_eq!(diff.heuristic_connections.len(), 1);
        assert!(diff.is_unchanged());

        let plain = workflow_diff(&log, left, right, false).unwrap();
        assert_eq!(plain.v1_only_connections.len(), 1);
        assert_eq!(plain.v2_only_connections.len(), 1);
    }
}
