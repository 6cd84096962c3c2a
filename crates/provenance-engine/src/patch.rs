//! Patch algebra
//!
//! Branch diffs are turned into replayable operation lists: [`invert`]
//! undoes a branch back to its base, [`normalize`] replays a branch on top
//! of its base, and [`simplify`] collapses a concatenation of the two into
//! the net edit. [`get_path_as_action`] chains them to move between any two
//! versions without materializing their common ancestor.

use std::cmp::Reverse;

use crate::action::{Action, ActionId};
use crate::diff::{operation_diff, shared_root, AddDict, DeleteDict};
use crate::error::Result;
use crate::ids::ObjectId;
use crate::materialize::{contains_object, current_operation_dict, current_operations, find_object, OperationDict};
use crate::operation::{AddOp, DeleteOp, OpKey, Operation};
use crate::vistrail::Vistrail;

/// Operations that take a branch's workflow back to its base
///
/// Branch additions are deleted children first, then deleted base objects
/// are restored parents first with their data looked up in `base`.
pub fn invert(adds: &AddDict, deletes: &DeleteDict, base: &OperationDict) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(adds.len() + deletes.len());

    let mut removals: Vec<&Operation> = adds.values().collect();
    removals.sort_by_key(|op| (Reverse(op.what().depth()), Reverse(op.id())));
    for op in removals {
        if let Some(key) = op.new_key() {
            ops.push(Operation::Delete(DeleteOp {
                id: op.id(),
                what: op.what(),
                old_id: key.id,
                parent: op.parent(),
            }));
        }
    }

    let mut restores: Vec<(&OpKey, &DeleteOp)> = deletes.iter().collect();
    restores.sort_by_key(|(key, delete)| (delete.what.depth(), delete.id, **key));
    for (key, delete) in restores {
        match find_object(base, *key) {
            Some((data, parent)) => ops.push(Operation::Add(AddOp {
                id: delete.id,
                data,
                parent,
            })),
            None => log::warn!("Cannot restore {:?}: not in the base operations", key),
        }
    }
    ops
}

/// Operations that replay a branch on top of its base
///
/// Deletes come first, children before parents, followed by the additions
/// parents first. Changes are replayed as plain adds of their new data.
pub fn normalize(adds: &AddDict, deletes: &DeleteDict) -> Vec<Operation> {
    let mut ops = Vec::with_capacity(adds.len() + deletes.len());

    let mut removals: Vec<(&OpKey, &DeleteOp)> = deletes.iter().collect();
    removals.sort_by_key(|(key, delete)| (Reverse(delete.what.depth()), Reverse(**key)));
    ops.extend(removals.into_iter().map(|(_, d)| Operation::Delete(d.clone())));

    let mut additions: Vec<&Operation> = adds.values().collect();
    additions.sort_by_key(|op| (op.what().depth(), op.id()));
    ops.extend(
        additions
            .into_iter()
            .filter_map(|op| op.clone().into_add())
            .map(Operation::Add),
    );
    ops
}

/// Collapse an operation list into its net effect
///
/// Every operation gets a synthetic id, decreasing in input order. A later
/// add of a key replaces a pending add of it, a delete cancels a pending add
/// of the same object (or strips it out of a pending add that embeds it),
/// and a change of a pending add becomes an add of the new data. The result
/// lists deletes then adds, each by descending synthetic id.
pub fn simplify(ops: Vec<Operation>) -> Vec<Operation> {
    let mut deletes: Vec<(ObjectId, Operation)> = Vec::new();
    let mut adds: Vec<(ObjectId, OpKey, Operation)> = Vec::new();
    let mut next: ObjectId = -1;

    for op in ops {
        let synthetic = next;
        next -= 1;

        match op {
            Operation::Add(mut add) => {
                add.id = synthetic;
                let key = add.data.key();
                adds.retain(|(_, k, _)| *k != key);
                adds.push((synthetic, key, Operation::Add(add)));
            }
            Operation::Delete(mut delete) => {
                delete.id = synthetic;
                let key = OpKey::new(delete.what, delete.old_id);
                if !cancel_pending(&mut adds, key) {
                    deletes.push((synthetic, Operation::Delete(delete)));
                }
            }
            Operation::Change(change) => {
                let old = OpKey::new(change.data.kind(), change.old_id);
                if !cancel_pending(&mut adds, old) {
                    deletes.push((
                        synthetic,
                        Operation::Delete(DeleteOp {
                            id: synthetic,
                            what: change.data.kind(),
                            old_id: change.old_id,
                            parent: change.parent,
                        }),
                    ));
                }
                let key = change.data.key();
                adds.retain(|(_, k, _)| *k != key);
                adds.push((
                    synthetic,
                    key,
                    Operation::Add(AddOp {
                        id: synthetic,
                        data: change.data,
                        parent: change.parent,
                    }),
                ));
            }
        }
    }

    deletes.sort_by_key(|(synthetic, _)| Reverse(*synthetic));
    adds.sort_by_key(|(synthetic, _, _)| Reverse(*synthetic));
    deletes
        .into_iter()
        .map(|(_, op)| op)
        .chain(adds.into_iter().map(|(_, _, op)| op))
        .collect()
}

/// Drop a pending add of `key`, or strip `key` out of a pending add that
/// embeds it. Returns whether anything was pending.
fn cancel_pending(adds: &mut Vec<(ObjectId, OpKey, Operation)>, key: OpKey) -> bool {
    if let Some(pos) = adds.iter().position(|(_, k, _)| *k == key) {
        adds.remove(pos);
        return true;
    }
    adds.iter_mut().any(|(_, _, op)| match op {
        Operation::Add(add) => add.data.remove_embedded(key).is_some(),
        _ => false,
    })
}

/// One synthetic action that turns the workflow at `v1` into the one at `v2`
///
/// The action is not part of the log: its id is 0 and its `prev_id` is
/// `v1`. Only operation dicts are built, never the common ancestor's
/// workflow.
pub fn get_path_as_action(vistrail: &Vistrail, v1: ActionId, v2: ActionId) -> Result<Action> {
    let root = shared_root(vistrail, &[v1, v2])?;
    let base = current_operations(vistrail, root)?;
    let branch1 = vistrail.actions_between(root, v1)?;
    let branch2 = vistrail.actions_between(root, v2)?;

    let (adds1, deletes1) = operation_diff(branch1.iter().copied(), &base);
    let (adds2, deletes2) = operation_diff(branch2.iter().copied(), &base);
    let target = current_operation_dict(branch2, &base);

    let mut ops = invert(&adds1, &deletes1, &base);
    ops.extend(normalize(&adds2, &deletes2));
    let mut ops = simplify(ops);
    // Restores of objects that sit inside something the target deletes.
    ops.retain(|op| match op {
        Operation::Add(add) => contains_object(&target, add.data.key()),
        _ => true,
    });

    log::debug!(
        "Path {} -> {} via {}: {} operations",
        v1,
        v2,
        root,
        ops.len()
    );
    Ok(Action::new(0, v1, "").with_operations(ops))
}
