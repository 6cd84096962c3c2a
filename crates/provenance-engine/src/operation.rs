//! Primitive edit operations
//!
//! An [`Operation`] adds, deletes or changes one typed entity of a workflow.
//! Parents are addressed through [`ParentRef`], and every constructor checks
//! that the child kind may hang off the given parent kind, so a malformed
//! attachment is rejected before it ever reaches the log.

use serde::{Deserialize, Serialize};

use crate::error::{ProvenanceError, Result};
use crate::ids::{ObjectId, ObjectKind};
use crate::types::{
    Annotation, Connection, Function, Location, Module, Other, Parameter, Port, PortSpec,
    Workflow,
};

/// Typed handle to the object an entity is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: ObjectKind,
    pub id: ObjectId,
}

impl ParentRef {
    pub fn module(id: ObjectId) -> Self {
        Self {
            kind: ObjectKind::Module,
            id,
        }
    }

    pub fn function(id: ObjectId) -> Self {
        Self {
            kind: ObjectKind::Function,
            id,
        }
    }

    pub fn connection(id: ObjectId) -> Self {
        Self {
            kind: ObjectKind::Connection,
            id,
        }
    }

    /// Operation-dict key of the parent object
    pub fn key(&self) -> OpKey {
        OpKey::new(self.kind, self.id)
    }
}

/// Check that an entity of `kind` may be attached to `parent`
pub fn check_parent(kind: ObjectKind, parent: Option<&ParentRef>) -> Result<()> {
    use ObjectKind as K;

    let allowed = match (kind, parent.map(|p| p.kind.namespace())) {
        (K::Module | K::Group | K::AbstractionRef | K::Connection | K::Other, None) => true,
        (K::Annotation, None | Some(K::Module)) => true,
        (K::Function | K::Location | K::PortSpec, Some(K::Module)) => true,
        (K::Parameter, Some(K::Function)) => true,
        (K::Port, Some(K::Connection)) => true,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(ProvenanceError::InvalidParent {
            kind,
            parent: match parent {
                Some(p) => format!("{} {}", p.kind, p.id),
                None => "the workflow".to_string(),
            },
        })
    }
}

/// Key of an entry in an operation dict: `(namespace, id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpKey {
    pub kind: ObjectKind,
    pub id: ObjectId,
}

impl OpKey {
    /// Build a key, folding module-like kinds into the module namespace
    pub fn new(kind: ObjectKind, id: ObjectId) -> Self {
        Self {
            kind: kind.namespace(),
            id,
        }
    }
}

/// The data carried by Add and Change operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "what", rename_all = "snake_case")]
pub enum Entity {
    Module(Module),
    Connection(Connection),
    Port(Port),
    Function(Function),
    Parameter(Parameter),
    Annotation(Annotation),
    Location(Location),
    PortSpec(PortSpec),
    Other(Other),
}

impl Entity {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Entity::Module(m) => m.object_kind(),
            Entity::Connection(_) => ObjectKind::Connection,
            Entity::Port(_) => ObjectKind::Port,
            Entity::Function(_) => ObjectKind::Function,
            Entity::Parameter(_) => ObjectKind::Parameter,
            Entity::Annotation(_) => ObjectKind::Annotation,
            Entity::Location(_) => ObjectKind::Location,
            Entity::PortSpec(_) => ObjectKind::PortSpec,
            Entity::Other(_) => ObjectKind::Other,
        }
    }

    pub fn id(&self) -> ObjectId {
        match self {
            Entity::Module(m) => m.id,
            Entity::Connection(c) => c.id,
            Entity::Port(p) => p.id,
            Entity::Function(f) => f.id,
            Entity::Parameter(p) => p.id,
            Entity::Annotation(a) => a.id,
            Entity::Location(l) => l.id,
            Entity::PortSpec(s) => s.id,
            Entity::Other(o) => o.id,
        }
    }

    pub fn key(&self) -> OpKey {
        OpKey::new(self.kind(), self.id())
    }

    /// Ids of this entity and every child it embeds
    ///
    /// The embedded workflow of a group is a separate id space and is not
    /// walked.
    pub fn introduced_ids(&self) -> Vec<(ObjectKind, ObjectId)> {
        let mut ids = vec![(self.kind(), self.id())];
        match self {
            Entity::Module(module) => {
                if let Some(location) = &module.location {
                    ids.push((ObjectKind::Location, location.id));
                }
                for function in &module.functions {
                    ids.push((ObjectKind::Function, function.id));
                    ids.extend(
                        function
                            .parameters
                            .iter()
                            .map(|p| (ObjectKind::Parameter, p.id)),
                    );
                }
                ids.extend(module.annotations.iter().map(|a| (ObjectKind::Annotation, a.id)));
                ids.extend(module.port_specs.iter().map(|s| (ObjectKind::PortSpec, s.id)));
            }
            Entity::Connection(connection) => {
                ids.extend(connection.ports.iter().map(|p| (ObjectKind::Port, p.id)));
            }
            Entity::Function(function) => {
                ids.extend(
                    function
                        .parameters
                        .iter()
                        .map(|p| (ObjectKind::Parameter, p.id)),
                );
            }
            _ => {}
        }
        ids
    }

    /// Clone of a child embedded in this entity, with its immediate parent
    pub fn find_embedded(&self, key: OpKey) -> Option<(Entity, ParentRef)> {
        match self {
            Entity::Module(module) => {
                let parent = ParentRef::module(module.id);
                match key.kind {
                    ObjectKind::Location => module
                        .location
                        .as_ref()
                        .filter(|l| l.id == key.id)
                        .map(|l| (Entity::Location(l.clone()), parent)),
                    ObjectKind::Function => module
                        .function(key.id)
                        .map(|f| (Entity::Function(f.clone()), parent)),
                    ObjectKind::Annotation => module
                        .annotations
                        .iter()
                        .find(|a| a.id == key.id)
                        .map(|a| (Entity::Annotation(a.clone()), parent)),
                    ObjectKind::PortSpec => module
                        .port_specs
                        .iter()
                        .find(|s| s.id == key.id)
                        .map(|s| (Entity::PortSpec(s.clone()), parent)),
                    ObjectKind::Parameter => module.functions.iter().find_map(|f| {
                        f.parameters
                            .iter()
                            .find(|p| p.id == key.id)
                            .map(|p| (Entity::Parameter(p.clone()), ParentRef::function(f.id)))
                    }),
                    _ => None,
                }
            }
            Entity::Connection(connection) if key.kind == ObjectKind::Port => connection
                .ports
                .iter()
                .find(|p| p.id == key.id)
                .map(|p| (Entity::Port(p.clone()), ParentRef::connection(connection.id))),
            Entity::Function(function) if key.kind == ObjectKind::Parameter => function
                .parameters
                .iter()
                .find(|p| p.id == key.id)
                .map(|p| (Entity::Parameter(p.clone()), ParentRef::function(function.id))),
            _ => None,
        }
    }

    /// Detach a child embedded in this entity and return it
    pub fn remove_embedded(&mut self, key: OpKey) -> Option<Entity> {
        match self {
            Entity::Module(module) => match key.kind {
                ObjectKind::Location => {
                    if module.location.as_ref().is_some_and(|l| l.id == key.id) {
                        module.location.take().map(Entity::Location)
                    } else {
                        None
                    }
                }
                ObjectKind::Function => module.remove_function(key.id).map(Entity::Function),
                ObjectKind::Annotation => module.remove_annotation(key.id).map(Entity::Annotation),
                ObjectKind::PortSpec => module.remove_port_spec(key.id).map(Entity::PortSpec),
                ObjectKind::Parameter => module
                    .functions
                    .iter_mut()
                    .find_map(|f| f.remove_parameter(key.id))
                    .map(Entity::Parameter),
                _ => None,
            },
            Entity::Connection(connection) if key.kind == ObjectKind::Port => {
                connection.remove_port(key.id).map(Entity::Port)
            }
            Entity::Function(function) if key.kind == ObjectKind::Parameter => {
                function.remove_parameter(key.id).map(Entity::Parameter)
            }
            _ => None,
        }
    }
}

/// Add a new entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddOp {
    pub id: ObjectId,
    pub data: Entity,
    pub parent: Option<ParentRef>,
}

/// Remove an existing entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOp {
    pub id: ObjectId,
    pub what: ObjectKind,
    pub old_id: ObjectId,
    pub parent: Option<ParentRef>,
}

/// Replace an entity, keeping identity continuity for diffing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOp {
    pub id: ObjectId,
    pub old_id: ObjectId,
    pub data: Entity,
    pub parent: Option<ParentRef>,
}

/// A primitive edit on the workflow object graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Add(AddOp),
    Delete(DeleteOp),
    Change(ChangeOp),
}

impl Operation {
    /// Create a validated Add
    pub fn add(id: ObjectId, data: Entity, parent: Option<ParentRef>) -> Result<Self> {
        check_parent(data.kind(), parent.as_ref())?;
        Ok(Operation::Add(AddOp { id, data, parent }))
    }

    /// Create a validated Delete
    pub fn delete(
        id: ObjectId,
        what: ObjectKind,
        old_id: ObjectId,
        parent: Option<ParentRef>,
    ) -> Result<Self> {
        check_parent(what, parent.as_ref())?;
        Ok(Operation::Delete(DeleteOp {
            id,
            what,
            old_id,
            parent,
        }))
    }

    /// Create a validated Change
    pub fn change(
        id: ObjectId,
        old_id: ObjectId,
        data: Entity,
        parent: Option<ParentRef>,
    ) -> Result<Self> {
        check_parent(data.kind(), parent.as_ref())?;
        Ok(Operation::Change(ChangeOp {
            id,
            old_id,
            data,
            parent,
        }))
    }

    /// Id of the operation itself
    pub fn id(&self) -> ObjectId {
        match self {
            Operation::Add(op) => op.id,
            Operation::Delete(op) => op.id,
            Operation::Change(op) => op.id,
        }
    }

    pub fn set_id(&mut self, id: ObjectId) {
        match self {
            Operation::Add(op) => op.id = id,
            Operation::Delete(op) => op.id = id,
            Operation::Change(op) => op.id = id,
        }
    }

    /// Kind of the entity this operation touches
    pub fn what(&self) -> ObjectKind {
        match self {
            Operation::Add(op) => op.data.kind(),
            Operation::Delete(op) => op.what,
            Operation::Change(op) => op.data.kind(),
        }
    }

    pub fn parent(&self) -> Option<ParentRef> {
        match self {
            Operation::Add(op) => op.parent,
            Operation::Delete(op) => op.parent,
            Operation::Change(op) => op.parent,
        }
    }

    /// Data carried by Add and Change
    pub fn data(&self) -> Option<&Entity> {
        match self {
            Operation::Add(op) => Some(&op.data),
            Operation::Delete(_) => None,
            Operation::Change(op) => Some(&op.data),
        }
    }

    /// Key of the object this operation brings into existence
    pub fn new_key(&self) -> Option<OpKey> {
        self.data().map(Entity::key)
    }

    /// Key of the object this operation removes
    pub fn old_key(&self) -> Option<OpKey> {
        match self {
            Operation::Add(_) => None,
            Operation::Delete(op) => Some(OpKey::new(op.what, op.old_id)),
            Operation::Change(op) => Some(OpKey::new(op.data.kind(), op.old_id)),
        }
    }

    /// Apply this operation to `workflow`
    pub fn apply(&self, workflow: &mut Workflow) -> Result<()> {
        match self {
            Operation::Add(op) => workflow.add_object(op.data.clone(), op.parent),
            Operation::Delete(op) => workflow.delete_object(op.what, op.old_id, op.parent),
            Operation::Change(op) => workflow.change_object(op.old_id, op.data.clone(), op.parent),
        }
    }

    /// Turn a live Add/Change into a plain Add carrying the same data
    pub fn into_add(self) -> Option<AddOp> {
        match self {
            Operation::Add(op) => Some(op),
            Operation::Change(op) => Some(AddOp {
                id: op.id,
                data: op.data,
                parent: op.parent,
            }),
            Operation::Delete(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_validation() {
        assert!(check_parent(ObjectKind::Module, None).is_ok());
        assert!(check_parent(ObjectKind::Function, Some(&ParentRef::module(1))).is_ok());
        assert!(check_parent(
            ObjectKind::Function,
            Some(&ParentRef {
                kind: ObjectKind::Group,
                id: 1
            })
        )
        .is_ok());
        assert!(check_parent(ObjectKind::Parameter, Some(&ParentRef::module(1))).is_err());
        assert!(check_parent(ObjectKind::Function, None).is_err());
        assert!(check_parent(ObjectKind::Action, None).is_err());

        let bad = Operation::add(
            1,
            Entity::Parameter(Parameter::new(1, 0, "String", "x")),
            Some(ParentRef::connection(3)),
        );
        assert!(matches!(bad, Err(ProvenanceError::InvalidParent { .. })));
    }

    #[test]
    fn test_keys() {
        let add = Operation::add(
            10,
            Entity::Module(Module::group(4, "basic", Workflow::new())),
            None,
        )
        .unwrap();
        assert_eq!(add.what(), ObjectKind::Group);
        assert_eq!(add.new_key(), Some(OpKey::new(ObjectKind::Module, 4)));
        assert_eq!(add.old_key(), None);

        let change = Operation::change(
            11,
            4,
            Entity::Module(Module::new(5, "A", "basic")),
            None,
        )
        .unwrap();
        assert_eq!(change.old_key(), Some(OpKey::new(ObjectKind::Module, 4)));
        assert_eq!(change.new_key(), Some(OpKey::new(ObjectKind::Module, 5)));
    }

    #[test]
    fn test_introduced_ids() {
        let module = Module::new(1, "A", "basic")
            .with_location(Location::new(2, 0.0, 0.0))
            .with_function(Function::new(3, "f", 0).with_parameter(Parameter::new(4, 0, "String", "v")));
        let ids = Entity::Module(module).introduced_ids();
        assert_eq!(
            ids,
            vec![
                (ObjectKind::Module, 1),
                (ObjectKind::Location, 2),
                (ObjectKind::Function, 3),
                (ObjectKind::Parameter, 4),
            ]
        );
    }

    #[test]
    fn test_serde_shape() {
        let op = Operation::delete(3, ObjectKind::Connection, 9, None).unwrap();
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "delete");
        assert_eq!(json["what"], "connection");
        assert_eq!(json["oldId"], 9);

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
