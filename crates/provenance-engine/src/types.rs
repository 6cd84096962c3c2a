//! Core types for the workflow object graph
//!
//! These types define the entities a workflow is made of (modules,
//! connections, ports, functions, parameters and their metadata) and the
//! [`Workflow`] snapshot that the materializer builds from the log.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action::ActionId;
use crate::error::{ProvenanceError, Result};
use crate::ids::{ObjectId, ObjectKind};
use crate::operation::{Entity, ParentRef};

/// Position of a module on the canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: ObjectId,
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub fn new(id: ObjectId, x: f64, y: f64) -> Self {
        Self { id, x, y }
    }
}

/// A single positional value of a function call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub id: ObjectId,
    pub pos: i32,
    /// Type signature of the value (e.g. "String", "Integer")
    #[serde(rename = "type")]
    pub type_name: String,
    /// Serialized value
    pub val: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Parameter {
    pub fn new(
        id: ObjectId,
        pos: i32,
        type_name: impl Into<String>,
        val: impl Into<String>,
    ) -> Self {
        Self {
            id,
            pos,
            type_name: type_name.into(),
            val: val.into(),
            alias: None,
        }
    }

    /// Set an alias for this parameter
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// A function (port assignment) set on a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub id: ObjectId,
    pub name: String,
    pub pos: i32,
    /// Parameters ordered by `(pos, id)`
    pub parameters: Vec<Parameter>,
}

impl Function {
    pub fn new(id: ObjectId, name: impl Into<String>, pos: i32) -> Self {
        Self {
            id,
            name: name.into(),
            pos,
            parameters: Vec::new(),
        }
    }

    /// Add a parameter (builder style)
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        // Builder input is trusted; a duplicate id simply keeps both.
        let at = self.parameter_slot(&parameter);
        self.parameters.insert(at, parameter);
        self
    }

    /// Insert a parameter keeping `(pos, id)` order
    pub fn insert_parameter(&mut self, parameter: Parameter) -> Result<()> {
        if self.parameters.iter().any(|p| p.id == parameter.id) {
            return Err(ProvenanceError::collision(ObjectKind::Parameter, parameter.id));
        }
        let at = self.parameter_slot(&parameter);
        self.parameters.insert(at, parameter);
        Ok(())
    }

    /// Remove a parameter by id
    pub fn remove_parameter(&mut self, id: ObjectId) -> Option<Parameter> {
        let pos = self.parameters.iter().position(|p| p.id == id)?;
        Some(self.parameters.remove(pos))
    }

    /// The first parameter's value, if any
    pub fn first_value(&self) -> Option<&str> {
        self.parameters.first().map(|p| p.val.as_str())
    }

    fn parameter_slot(&self, parameter: &Parameter) -> usize {
        self.parameters
            .iter()
            .position(|p| (p.pos, p.id) > (parameter.pos, parameter.id))
            .unwrap_or(self.parameters.len())
    }
}

/// Key/value note attached to a module, a workflow or an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: ObjectId,
    pub key: String,
    pub value: String,
}

impl Annotation {
    pub fn new(id: ObjectId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Free-form key/value pair stored at workflow level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Other {
    pub id: ObjectId,
    pub key: String,
    pub value: String,
}

/// Direction of a declared port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

/// A port declared on a module (used by groups to publish boundary ports)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub id: ObjectId,
    pub name: String,
    pub direction: PortDirection,
    pub sigstring: String,
}

impl PortSpec {
    pub fn new(
        id: ObjectId,
        name: impl Into<String>,
        direction: PortDirection,
        sigstring: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            direction,
            sigstring: sigstring.into(),
        }
    }
}

/// Which end of a connection a port sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortRole {
    Source,
    Destination,
}

/// One end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub id: ObjectId,
    pub role: PortRole,
    pub module_id: ObjectId,
    pub module_name: String,
    /// Port name on the module
    pub name: String,
    /// Type signature of the port
    pub spec: String,
}

impl Port {
    pub fn new(
        id: ObjectId,
        role: PortRole,
        module_id: ObjectId,
        module_name: impl Into<String>,
        name: impl Into<String>,
        spec: impl Into<String>,
    ) -> Self {
        Self {
            id,
            role,
            module_id,
            module_name: module_name.into(),
            name: name.into(),
            spec: spec.into(),
        }
    }
}

/// An edge between an output port and an input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ObjectId,
    /// Ports ordered by role
    pub ports: Vec<Port>,
}

impl Connection {
    /// Create a connection from its two ports
    pub fn new(id: ObjectId, source: Port, destination: Port) -> Self {
        let mut connection = Self {
            id,
            ports: Vec::with_capacity(2),
        };
        connection.ports.push(Port {
            role: PortRole::Source,
            ..source
        });
        connection.ports.push(Port {
            role: PortRole::Destination,
            ..destination
        });
        connection
    }

    pub fn port(&self, role: PortRole) -> Option<&Port> {
        self.ports.iter().find(|p| p.role == role)
    }

    pub fn port_mut(&mut self, role: PortRole) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.role == role)
    }

    pub fn source(&self) -> Option<&Port> {
        self.port(PortRole::Source)
    }

    pub fn destination(&self) -> Option<&Port> {
        self.port(PortRole::Destination)
    }

    /// Whether either end of this connection is on `module_id`
    pub fn touches(&self, module_id: ObjectId) -> bool {
        self.ports.iter().any(|p| p.module_id == module_id)
    }

    /// Insert a port; each role can be filled once
    pub fn insert_port(&mut self, port: Port) -> Result<()> {
        if self.ports.iter().any(|p| p.id == port.id || p.role == port.role) {
            return Err(ProvenanceError::collision(ObjectKind::Port, port.id));
        }
        self.ports.push(port);
        self.ports.sort_by_key(|p| p.role);
        Ok(())
    }

    pub fn remove_port(&mut self, id: ObjectId) -> Option<Port> {
        let pos = self.ports.iter().position(|p| p.id == id)?;
        Some(self.ports.remove(pos))
    }
}

/// What kind of node a module is
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleKind {
    /// A regular module
    #[default]
    Plain,
    /// A module wrapping an embedded sub-workflow
    Group { workflow: Box<Workflow> },
    /// A reference to a version of a nested abstraction log
    #[serde(rename_all = "camelCase")]
    Abstraction {
        abstraction_id: ObjectId,
        internal_version: ActionId,
    },
}

/// A node of the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: ObjectId,
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Functions ordered by `(pos, id)`
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub port_specs: Vec<PortSpec>,
    #[serde(default)]
    pub kind: ModuleKind,
}

impl Module {
    /// Create a plain module
    pub fn new(id: ObjectId, name: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            package: package.into(),
            version: String::new(),
            location: None,
            functions: Vec::new(),
            annotations: Vec::new(),
            port_specs: Vec::new(),
            kind: ModuleKind::Plain,
        }
    }

    /// Create a group module wrapping `workflow`
    pub fn group(id: ObjectId, package: impl Into<String>, workflow: Workflow) -> Self {
        Self {
            kind: ModuleKind::Group {
                workflow: Box::new(workflow),
            },
            ..Self::new(id, "Group", package)
        }
    }

    /// Create a reference to `internal_version` of abstraction `abstraction_id`
    pub fn abstraction(
        id: ObjectId,
        name: impl Into<String>,
        abstraction_id: ObjectId,
        internal_version: ActionId,
    ) -> Self {
        Self {
            kind: ModuleKind::Abstraction {
                abstraction_id,
                internal_version,
            },
            ..Self::new(id, name, "")
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_function(mut self, function: Function) -> Self {
        let at = self.function_slot(&function);
        self.functions.insert(at, function);
        self
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn with_port_spec(mut self, spec: PortSpec) -> Self {
        self.port_specs.push(spec);
        self
    }

    /// The object kind this module is stored under
    pub fn object_kind(&self) -> ObjectKind {
        match self.kind {
            ModuleKind::Plain => ObjectKind::Module,
            ModuleKind::Group { .. } => ObjectKind::Group,
            ModuleKind::Abstraction { .. } => ObjectKind::AbstractionRef,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ModuleKind::Group { .. })
    }

    pub fn function(&self, id: ObjectId) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn function_mut(&mut self, id: ObjectId) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.id == id)
    }

    /// Find a function by name
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Find an annotation by key
    pub fn annotation_by_key(&self, key: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.key == key)
    }

    /// Insert a function keeping `(pos, id)` order
    pub fn insert_function(&mut self, function: Function) -> Result<()> {
        if self.function(function.id).is_some() {
            return Err(ProvenanceError::collision(ObjectKind::Function, function.id));
        }
        let at = self.function_slot(&function);
        self.functions.insert(at, function);
        Ok(())
    }

    pub fn remove_function(&mut self, id: ObjectId) -> Option<Function> {
        let pos = self.functions.iter().position(|f| f.id == id)?;
        Some(self.functions.remove(pos))
    }

    /// Remove every function called `name`
    pub fn remove_functions_named(&mut self, name: &str) {
        self.functions.retain(|f| f.name != name);
    }

    pub fn insert_annotation(&mut self, annotation: Annotation) -> Result<()> {
        if self.annotations.iter().any(|a| a.id == annotation.id) {
            return Err(ProvenanceError::collision(ObjectKind::Annotation, annotation.id));
        }
        self.annotations.push(annotation);
        self.annotations.sort_by_key(|a| a.id);
        Ok(())
    }

    pub fn remove_annotation(&mut self, id: ObjectId) -> Option<Annotation> {
        let pos = self.annotations.iter().position(|a| a.id == id)?;
        Some(self.annotations.remove(pos))
    }

    pub fn insert_port_spec(&mut self, spec: PortSpec) -> Result<()> {
        if self.port_specs.iter().any(|s| s.id == spec.id) {
            return Err(ProvenanceError::collision(ObjectKind::PortSpec, spec.id));
        }
        self.port_specs.push(spec);
        self.port_specs.sort_by_key(|s| s.id);
        Ok(())
    }

    pub fn remove_port_spec(&mut self, id: ObjectId) -> Option<PortSpec> {
        let pos = self.port_specs.iter().position(|s| s.id == id)?;
        Some(self.port_specs.remove(pos))
    }

    fn function_slot(&self, function: &Function) -> usize {
        self.functions
            .iter()
            .position(|f| (f.pos, f.id) > (function.pos, function.id))
            .unwrap_or(self.functions.len())
    }
}

/// A materialized workflow snapshot
///
/// Nodes (modules, groups and abstraction references) and connections are
/// keyed by id, so two snapshots compare equal whenever they hold the same
/// objects regardless of the order the operations were replayed in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(with = "keyed_by_id")]
    pub modules: BTreeMap<ObjectId, Module>,
    #[serde(with = "keyed_by_id")]
    pub connections: BTreeMap<ObjectId, Connection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub others: Vec<Other>,
}

/// Objects stored in a [`Workflow`] map under their own id
pub trait Keyed {
    fn key(&self) -> ObjectId;
}

impl Keyed for Module {
    fn key(&self) -> ObjectId {
        self.id
    }
}

impl Keyed for Connection {
    fn key(&self) -> ObjectId {
        self.id
    }
}

/// Id-keyed maps travel as plain sequences
///
/// Integer map keys become strings in JSON, and serde cannot turn them back
/// into integers once a tagged enum (a group inside an operation) has
/// buffered the content.
mod keyed_by_id {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Keyed;
    use crate::ids::ObjectId;

    pub fn serialize<S, T>(map: &BTreeMap<ObjectId, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeMap<ObjectId, T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Keyed,
    {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(items.into_iter().map(|item| (item.key(), item)).collect())
    }
}

impl Workflow {
    /// Create a new empty workflow
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
            && self.connections.is_empty()
            && self.annotations.is_empty()
            && self.others.is_empty()
    }

    pub fn module(&self, id: ObjectId) -> Option<&Module> {
        self.modules.get(&id)
    }

    pub fn module_mut(&mut self, id: ObjectId) -> Option<&mut Module> {
        self.modules.get_mut(&id)
    }

    pub fn connection(&self, id: ObjectId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Insert a module directly (builder convenience)
    pub fn with_module(mut self, module: Module) -> Self {
        self.modules.insert(module.id, module);
        self
    }

    /// Insert a connection directly (builder convenience)
    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.insert(connection.id, connection);
        self
    }

    /// Connections whose destination is on `module_id`
    pub fn incoming_connections(&self, module_id: ObjectId) -> impl Iterator<Item = &Connection> + '_ {
        self.connections
            .values()
            .filter(move |c| c.destination().is_some_and(|p| p.module_id == module_id))
    }

    /// Connections whose source is on `module_id`
    pub fn outgoing_connections(&self, module_id: ObjectId) -> impl Iterator<Item = &Connection> + '_ {
        self.connections
            .values()
            .filter(move |c| c.source().is_some_and(|p| p.module_id == module_id))
    }

    /// Ids of group and abstraction nodes, ascending
    pub fn group_ids(&self) -> Vec<ObjectId> {
        self.modules
            .values()
            .filter(|m| !matches!(m.kind, ModuleKind::Plain))
            .map(|m| m.id)
            .collect()
    }

    /// Smallest node or connection id in the workflow (0 when empty)
    pub fn min_id(&self) -> ObjectId {
        let modules = self.modules.keys().next().copied().unwrap_or(0);
        let connections = self.connections.keys().next().copied().unwrap_or(0);
        modules.min(connections).min(0)
    }

    /// Find a function anywhere in the workflow
    pub fn function_mut(&mut self, id: ObjectId) -> Option<&mut Function> {
        self.modules.values_mut().find_map(|m| m.function_mut(id))
    }

    /// Flat listing of every object with its parent
    pub fn object_refs(&self) -> Vec<(ObjectKind, ObjectId, Option<ParentRef>)> {
        let mut refs = Vec::new();
        for module in self.modules.values() {
            refs.push((module.object_kind(), module.id, None));
            let parent = Some(ParentRef::module(module.id));
            if let Some(location) = &module.location {
                refs.push((ObjectKind::Location, location.id, parent));
            }
            for function in &module.functions {
                refs.push((ObjectKind::Function, function.id, parent));
                for parameter in &function.parameters {
                    refs.push((
                        ObjectKind::Parameter,
                        parameter.id,
                        Some(ParentRef::function(function.id)),
                    ));
                }
            }
            for annotation in &module.annotations {
                refs.push((ObjectKind::Annotation, annotation.id, parent));
            }
            for spec in &module.port_specs {
                refs.push((ObjectKind::PortSpec, spec.id, parent));
            }
        }
        for connection in self.connections.values() {
            refs.push((ObjectKind::Connection, connection.id, None));
            for port in &connection.ports {
                refs.push((
                    ObjectKind::Port,
                    port.id,
                    Some(ParentRef::connection(connection.id)),
                ));
            }
        }
        for annotation in &self.annotations {
            refs.push((ObjectKind::Annotation, annotation.id, None));
        }
        for other in &self.others {
            refs.push((ObjectKind::Other, other.id, None));
        }
        refs
    }

    // =========================================================================
    // Object-level mutation (the target of replayed operations)
    // =========================================================================

    /// Attach `data` to the workflow under `parent`
    pub fn add_object(&mut self, data: Entity, parent: Option<ParentRef>) -> Result<()> {
        match data {
            Entity::Module(module) => {
                if self.modules.contains_key(&module.id) {
                    return Err(ProvenanceError::collision(module.object_kind(), module.id));
                }
                self.modules.insert(module.id, module);
            }
            Entity::Connection(connection) => {
                if self.connections.contains_key(&connection.id) {
                    return Err(ProvenanceError::collision(ObjectKind::Connection, connection.id));
                }
                self.connections.insert(connection.id, connection);
            }
            Entity::Other(other) => {
                if self.others.iter().any(|o| o.id == other.id) {
                    return Err(ProvenanceError::collision(ObjectKind::Other, other.id));
                }
                self.others.push(other);
                self.others.sort_by_key(|o| o.id);
            }
            Entity::Annotation(annotation) => match parent {
                None => {
                    if self.annotations.iter().any(|a| a.id == annotation.id) {
                        return Err(ProvenanceError::collision(
                            ObjectKind::Annotation,
                            annotation.id,
                        ));
                    }
                    self.annotations.push(annotation);
                    self.annotations.sort_by_key(|a| a.id);
                }
                Some(parent) => self.parent_module(parent)?.insert_annotation(annotation)?,
            },
            Entity::Function(function) => {
                self.parent_module(Self::required(ObjectKind::Function, parent)?)?
                    .insert_function(function)?;
            }
            Entity::PortSpec(spec) => {
                self.parent_module(Self::required(ObjectKind::PortSpec, parent)?)?
                    .insert_port_spec(spec)?;
            }
            Entity::Location(location) => {
                let module = self.parent_module(Self::required(ObjectKind::Location, parent)?)?;
                if module.location.is_some() {
                    return Err(ProvenanceError::collision(ObjectKind::Location, location.id));
                }
                module.location = Some(location);
            }
            Entity::Parameter(parameter) => {
                let parent = Self::required(ObjectKind::Parameter, parent)?;
                self.function_mut(parent.id)
                    .ok_or_else(|| ProvenanceError::missing_parent(parent.kind, parent.id))?
                    .insert_parameter(parameter)?;
            }
            Entity::Port(port) => {
                let parent = Self::required(ObjectKind::Port, parent)?;
                self.connections
                    .get_mut(&parent.id)
                    .ok_or_else(|| ProvenanceError::missing_parent(parent.kind, parent.id))?
                    .insert_port(port)?;
            }
        }
        Ok(())
    }

    /// Remove the object `(what, id)` together with everything it owns
    pub fn delete_object(
        &mut self,
        what: ObjectKind,
        id: ObjectId,
        parent: Option<ParentRef>,
    ) -> Result<()> {
        let removed = match what {
            ObjectKind::Module | ObjectKind::Group | ObjectKind::AbstractionRef => {
                self.modules.remove(&id).is_some()
            }
            ObjectKind::Connection => self.connections.remove(&id).is_some(),
            ObjectKind::Other => remove_by_id(&mut self.others, |o| o.id == id),
            ObjectKind::Annotation => match parent {
                None => remove_by_id(&mut self.annotations, |a| a.id == id),
                Some(parent) => self.parent_module(parent)?.remove_annotation(id).is_some(),
            },
            ObjectKind::Function => self
                .parent_module(Self::required(what, parent)?)?
                .remove_function(id)
                .is_some(),
            ObjectKind::PortSpec => self
                .parent_module(Self::required(what, parent)?)?
                .remove_port_spec(id)
                .is_some(),
            ObjectKind::Location => {
                let module = self.parent_module(Self::required(what, parent)?)?;
                let found = module.location.as_ref().is_some_and(|l| l.id == id);
                if found {
                    module.location = None;
                }
                found
            }
            ObjectKind::Parameter => {
                let parent = Self::required(what, parent)?;
                self.function_mut(parent.id)
                    .ok_or_else(|| ProvenanceError::missing_parent(parent.kind, parent.id))?
                    .remove_parameter(id)
                    .is_some()
            }
            ObjectKind::Port => {
                let parent = Self::required(what, parent)?;
                self.connections
                    .get_mut(&parent.id)
                    .ok_or_else(|| ProvenanceError::missing_parent(parent.kind, parent.id))?
                    .remove_port(id)
                    .is_some()
            }
            ObjectKind::Action | ObjectKind::Operation | ObjectKind::Tag => false,
        };

        if removed {
            Ok(())
        } else {
            Err(ProvenanceError::missing(what, id))
        }
    }

    /// Replace `old_id` with `data` (delete followed by add)
    pub fn change_object(
        &mut self,
        old_id: ObjectId,
        data: Entity,
        parent: Option<ParentRef>,
    ) -> Result<()> {
        self.delete_object(data.kind(), old_id, parent)?;
        self.add_object(data, parent)
    }

    fn required(kind: ObjectKind, parent: Option<ParentRef>) -> Result<ParentRef> {
        parent.ok_or_else(|| ProvenanceError::InvalidParent {
            kind,
            parent: "the workflow".to_string(),
        })
    }

    fn parent_module(&mut self, parent: ParentRef) -> Result<&mut Module> {
        self.modules
            .get_mut(&parent.id)
            .ok_or_else(|| ProvenanceError::missing_parent(parent.kind, parent.id))
    }
}

fn remove_by_id<T>(items: &mut Vec<T>, matches: impl Fn(&T) -> bool) -> bool {
    match items.iter().position(matches) {
        Some(pos) => {
            items.remove(pos);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: ObjectId, role: PortRole, module_id: ObjectId) -> Port {
        Port::new(id, role, module_id, "PythonSource", "self", "(Module)")
    }

    #[test]
    fn test_functions_keep_position_order() {
        let mut module = Module::new(1, "PythonSource", "basic");
        module.insert_function(Function::new(7, "b", 1)).unwrap();
        module.insert_function(Function::new(9, "a", 0)).unwrap();
        module.insert_function(Function::new(3, "c", 1)).unwrap();

        let order: Vec<_> = module.functions.iter().map(|f| f.id).collect();
        assert_eq!(order, vec![9, 3, 7]);
        assert!(module.insert_function(Function::new(3, "dup", 5)).is_err());
        assert_eq!(module.function_by_name("a").map(|f| f.id), Some(9));
    }

    #[test]
    fn test_connection_edges() {
        let mut workflow = Workflow::new()
            .with_module(Module::new(1, "A", "basic"))
            .with_module(Module::new(2, "B", "basic"));
        workflow
            .add_object(
                Entity::Connection(Connection::new(
                    5,
                    port(1, PortRole::Source, 1),
                    port(2, PortRole::Destination, 2),
                )),
                None,
            )
            .unwrap();

        assert_eq!(workflow.outgoing_connections(1).count(), 1);
        assert_eq!(workflow.incoming_connections(2).count(), 1);
        assert_eq!(workflow.incoming_connections(1).count(), 0);
        assert!(workflow.connection(5).unwrap().touches(2));
    }

    #[test]
    fn test_nested_add_and_delete() {
        let mut workflow = Workflow::new();
        workflow
            .add_object(Entity::Module(Module::new(1, "A", "basic")), None)
            .unwrap();
        workflow
            .add_object(
                Entity::Function(Function::new(2, "value", 0)),
                Some(ParentRef::module(1)),
            )
            .unwrap();
        workflow
            .add_object(
                Entity::Parameter(Parameter::new(3, 0, "String", "abc")),
                Some(ParentRef::function(2)),
            )
            .unwrap();

        let function = workflow.module(1).unwrap().function(2).unwrap();
        assert_eq!(function.first_value(), Some("abc"));

        let missing = workflow.add_object(
            Entity::Function(Function::new(4, "other", 0)),
            Some(ParentRef::module(99)),
        );
        assert!(matches!(missing, Err(ProvenanceError::MissingParent { id: 99, .. })));

        workflow
            .delete_object(ObjectKind::Module, 1, None)
            .unwrap();
        assert!(workflow.is_empty());
        assert!(matches!(
            workflow.delete_object(ObjectKind::Module, 1, None),
            Err(ProvenanceError::MissingObject { .. })
        ));
    }

    #[test]
    fn test_change_location() {
        let mut workflow = Workflow::new()
            .with_module(Module::new(1, "A", "basic").with_location(Location::new(4, 0.0, 0.0)));
        workflow
            .change_object(
                4,
                Entity::Location(Location::new(5, 10.0, 20.0)),
                Some(ParentRef::module(1)),
            )
            .unwrap();

        let location = workflow.module(1).unwrap().location.clone().unwrap();
        assert_eq!(location, Location::new(5, 10.0, 20.0));
    }

    #[test]
    fn test_object_refs_and_min_id() {
        let workflow = Workflow::new()
            .with_module(
                Module::new(-3, "A", "basic")
                    .with_function(Function::new(1, "f", 0).with_parameter(Parameter::new(
                        1, 0, "Integer", "1",
                    ))),
            )
            .with_module(Module::new(4, "B", "basic"));

        let refs = workflow.object_refs();
        assert_eq!(refs.len(), 4);
        assert!(refs.contains(&(ObjectKind::Parameter, 1, Some(ParentRef::function(1)))));
        assert_eq!(workflow.min_id(), -3);
    }

    #[test]
    fn test_group_survives_tagged_serialization() {
        let body = Workflow::new()
            .with_module(Module::new(1, "A", "basic"))
            .with_module(Module::new(2, "B", "basic"))
            .with_connection(Connection::new(
                3,
                port(4, PortRole::Source, 1),
                port(5, PortRole::Destination, 2),
            ));
        let entity = Entity::Module(Module::group(9, "basic", body));

        let json = serde_json::to_string(&entity).unwrap();
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);

        let value = serde_json::to_value(Workflow::new().with_module(Module::new(7, "C", "basic"))).unwrap();
        assert_eq!(value["modules"][0]["id"], 7);
    }
}
