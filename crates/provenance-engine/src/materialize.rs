//! Materializer: from an action chain to a workflow snapshot
//!
//! Walking a chain of actions and folding their operations into an
//! [`OperationDict`] yields the minimal set of still-live Add/Change
//! operations for a version. Replaying only those onto an empty workflow
//! produces the same snapshot as replaying every action in log order.
//!
//! Objects can exist in two shapes inside the dict: as their own entry, or
//! embedded in the data of an ancestor's entry (a module added together with
//! its functions). Removing an object handles both, and always takes its
//! descendants along, so the dict never holds an entry whose parent is gone.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::action::{Action, ActionId, ROOT_VERSION};
use crate::error::Result;
use crate::operation::{Entity, OpKey, Operation, ParentRef};
use crate::types::Workflow;
use crate::vistrail::Vistrail;

/// Live operations of a version, keyed by the object they introduce
pub type OperationDict = BTreeMap<OpKey, Operation>;

/// Fold `actions` into a copy of `start`
pub fn current_operation_dict<'a, I>(actions: I, start: &OperationDict) -> OperationDict
where
    I: IntoIterator<Item = &'a Action>,
{
    let mut folder = Folder::new(start);
    for action in actions {
        for op in &action.operations {
            folder.fold(op);
        }
    }
    folder.dict
}

/// Live operations of `version`
pub fn current_operations(vistrail: &Vistrail, version: ActionId) -> Result<OperationDict> {
    let chain = vistrail.action_chain(version)?;
    Ok(current_operation_dict(chain, &OperationDict::new()))
}

/// An operation dict plus the indices that keep removal proportional to
/// the size of the removed subtree
struct Folder {
    dict: OperationDict,
    /// Parent key -> entries hanging off it
    children: HashMap<OpKey, HashSet<OpKey>>,
    /// Embedded key -> entry whose data holds it
    owners: HashMap<OpKey, OpKey>,
}

impl Folder {
    fn new(start: &OperationDict) -> Self {
        let mut folder = Self {
            dict: OperationDict::new(),
            children: HashMap::new(),
            owners: HashMap::new(),
        };
        for (key, op) in start {
            folder.insert(*key, op.clone());
        }
        folder
    }

    fn fold(&mut self, op: &Operation) {
        if let Some(old) = op.old_key() {
            if !self.remove(old) {
                log::debug!("Ignoring removal of {:?}: not live", old);
            }
        }
        if let Some(new) = op.new_key() {
            self.insert(new, op.clone());
        }
    }

    fn insert(&mut self, key: OpKey, op: Operation) {
        if let Some(replaced) = self.dict.remove(&key) {
            self.unindex(key, &replaced);
        }
        self.index(key, &op);
        self.dict.insert(key, op);
    }

    fn index(&mut self, key: OpKey, op: &Operation) {
        if let Some(parent) = op.parent() {
            self.children.entry(parent.key()).or_default().insert(key);
        }
        if let Some(data) = op.data() {
            for embedded in embedded_keys(data).into_iter().filter(|k| *k != key) {
                self.owners.insert(embedded, key);
            }
        }
    }

    fn unindex(&mut self, key: OpKey, op: &Operation) {
        if let Some(parent) = op.parent() {
            if let Some(siblings) = self.children.get_mut(&parent.key()) {
                siblings.remove(&key);
            }
        }
        if let Some(data) = op.data() {
            for embedded in embedded_keys(data) {
                if self.owners.get(&embedded) == Some(&key) {
                    self.owners.remove(&embedded);
                }
            }
        }
    }

    /// Drop `key` and its descendants; false when `key` was not live
    fn remove(&mut self, key: OpKey) -> bool {
        let roots = if let Some(op) = self.dict.get(&key) {
            op.data().map(embedded_keys).unwrap_or_else(|| vec![key])
        } else if let Some(owner) = self.owners.get(&key).copied() {
            let Some(data) = self.dict.get_mut(&owner).and_then(data_mut) else {
                return false;
            };
            let Some(removed) = data.remove_embedded(key) else {
                return false;
            };
            let roots = embedded_keys(&removed);
            for embedded in &roots {
                self.owners.remove(embedded);
            }
            roots
        } else {
            return false;
        };

        let mut doomed: HashSet<OpKey> = HashSet::new();
        let mut queue = roots;
        while let Some(k) = queue.pop() {
            if !doomed.insert(k) {
                continue;
            }
            if let Some(data) = self.dict.get(&k).and_then(Operation::data) {
                queue.extend(embedded_keys(data));
            }
            if let Some(children) = self.children.get(&k) {
                queue.extend(children.iter().copied());
            }
        }

        for k in &doomed {
            if let Some(op) = self.dict.remove(k) {
                self.unindex(*k, &op);
            }
            self.children.remove(k);
        }
        true
    }
}

/// Whether `key` is live in `dict`, as an entry or embedded in one
pub fn contains_object(dict: &OperationDict, key: OpKey) -> bool {
    dict.contains_key(&key)
        || dict
            .values()
            .filter_map(Operation::data)
            .any(|data| data.find_embedded(key).is_some())
}

/// Current data of `key` in `dict` and the parent it hangs off
pub fn find_object(dict: &OperationDict, key: OpKey) -> Option<(Entity, Option<ParentRef>)> {
    if let Some(op) = dict.get(&key) {
        return op.data().map(|data| (data.clone(), op.parent()));
    }
    dict.values()
        .filter_map(Operation::data)
        .find_map(|data| data.find_embedded(key))
        .map(|(data, parent)| (data, Some(parent)))
}

/// Every object key in the subtree rooted at `key` (including embedded ids)
pub fn subtree_keys(dict: &OperationDict, key: OpKey) -> HashSet<OpKey> {
    let mut doomed: HashSet<OpKey> = HashSet::new();
    match find_object(dict, key) {
        Some((data, _)) => doomed.extend(embedded_keys(&data)),
        None => {
            doomed.insert(key);
        }
    }
    loop {
        let next: Vec<(OpKey, Vec<OpKey>)> = dict
            .iter()
            .filter(|(k, op)| !doomed.contains(k) && parent_in(op, &doomed))
            .map(|(k, op)| (*k, op.data().map(embedded_keys).unwrap_or_default()))
            .collect();
        if next.is_empty() {
            return doomed;
        }
        for (k, embedded) in next {
            doomed.insert(k);
            doomed.extend(embedded);
        }
    }
}

/// Remove `key` and all of its descendants from `dict`
///
/// Returns the keys of the removed subtree, or `None` when `key` was not
/// live.
pub fn remove_subtree(dict: &mut OperationDict, key: OpKey) -> Option<HashSet<OpKey>> {
    if !contains_object(dict, key) {
        return None;
    }
    let doomed = subtree_keys(dict, key);
    if dict.remove(&key).is_none() {
        for op in dict.values_mut() {
            if let Some(data) = data_mut(op) {
                if data.remove_embedded(key).is_some() {
                    break;
                }
            }
        }
    }
    dict.retain(|k, _| !doomed.contains(k));
    Some(doomed)
}

/// Remove entries whose parent lies inside `doomed`, transitively
pub fn remove_orphans(dict: &mut OperationDict, doomed: &HashSet<OpKey>) -> Vec<OpKey> {
    let mut doomed = doomed.clone();
    let mut removed = Vec::new();
    loop {
        let next: Vec<OpKey> = dict
            .iter()
            .filter(|(_, op)| parent_in(op, &doomed))
            .map(|(k, _)| *k)
            .collect();
        if next.is_empty() {
            return removed;
        }
        for k in next {
            if let Some(op) = dict.remove(&k) {
                doomed.insert(k);
                if let Some(data) = op.data() {
                    doomed.extend(embedded_keys(data));
                }
                removed.push(k);
            }
        }
    }
}

fn parent_in(op: &Operation, keys: &HashSet<OpKey>) -> bool {
    op.parent().is_some_and(|p| keys.contains(&p.key()))
}

fn embedded_keys(data: &Entity) -> Vec<OpKey> {
    data.introduced_ids()
        .into_iter()
        .map(|(kind, id)| OpKey::new(kind, id))
        .collect()
}

fn data_mut(op: &mut Operation) -> Option<&mut Entity> {
    match op {
        Operation::Add(add) => Some(&mut add.data),
        Operation::Change(change) => Some(&mut change.data),
        Operation::Delete(_) => None,
    }
}

/// Live operations in replay order: parents before children, then by op id
pub fn replay_order(dict: &OperationDict) -> Vec<&Operation> {
    let mut ops: Vec<&Operation> = dict.values().collect();
    ops.sort_by_key(|op| (op.what().depth(), op.id()));
    ops
}

/// Build a workflow from a dict of live operations
pub fn build_workflow(dict: &OperationDict) -> Result<Workflow> {
    let mut workflow = Workflow::new();
    for op in replay_order(dict) {
        if let Some(data) = op.data() {
            workflow.add_object(data.clone(), op.parent())?;
        }
    }
    Ok(workflow)
}

/// Materialize the workflow at `version` from its collapsed operations
pub fn materialize(vistrail: &Vistrail, version: ActionId) -> Result<Workflow> {
    if version == ROOT_VERSION {
        return Ok(Workflow::new());
    }
    let dict = current_operations(vistrail, version)?;
    let workflow = build_workflow(&dict)?;
    log::debug!(
        "Materialized version {} of '{}': {} modules, {} connections",
        version,
        vistrail.name,
        workflow.modules.len(),
        workflow.connections.len()
    );
    Ok(workflow)
}

/// Replay one action's operations onto `workflow` in log order
pub fn perform_action(workflow: &mut Workflow, action: &Action) -> Result<()> {
    for op in &action.operations {
        op.apply(workflow)?;
    }
    Ok(())
}

/// Materialize `version` by replaying every action of its chain in order
pub fn replay(vistrail: &Vistrail, version: ActionId) -> Result<Workflow> {
    let mut workflow = Workflow::new();
    for action in vistrail.action_chain(version)? {
        perform_action(&mut workflow, action)?;
    }
    Ok(workflow)
}
