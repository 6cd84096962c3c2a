//! Fluent builder for recording actions
//!
//! Provides a fluent API that allocates ids from the log's scope while
//! operations are being assembled, then commits the finished action.

use crate::action::{Action, ActionId};
use crate::error::{ProvenanceError, Result};
use crate::ids::{ObjectId, ObjectKind};
use crate::operation::{Entity, Operation, ParentRef};
use crate::types::{Annotation, Connection, Function, Location, Module, Parameter, Port, PortRole};
use crate::vistrail::Vistrail;

/// One end of a connection being built
#[derive(Debug, Clone)]
pub struct PortEnd {
    pub module_id: ObjectId,
    pub module_name: String,
    pub port: String,
    pub spec: String,
}

impl PortEnd {
    pub fn new(module_id: ObjectId, module_name: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            module_id,
            module_name: module_name.into(),
            port: port.into(),
            spec: String::new(),
        }
    }

    /// Set the port signature
    pub fn with_spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = spec.into();
        self
    }
}

/// Fluent builder for one action on a log
///
/// # Example
///
/// ```ignore
/// let mut b = log.begin_action(ROOT_VERSION);
/// let reader = b.add_module("FileReader", "basic");
/// let sink = b.add_module("Print", "basic");
/// b.connect(PortEnd::new(reader, "FileReader", "value"), PortEnd::new(sink, "Print", "value"));
/// let version = b.commit()?;
/// ```
pub struct ActionBuilder<'a> {
    log: &'a mut Vistrail,
    action: Action,
    error: Option<ProvenanceError>,
}

impl<'a> ActionBuilder<'a> {
    pub(crate) fn new(log: &'a mut Vistrail, prev_id: ActionId) -> Self {
        let id = log.get_new_id(ObjectKind::Action);
        Self {
            log,
            action: Action::new(id, prev_id, ""),
            error: None,
        }
    }

    /// Id the action will be committed under
    pub fn action_id(&self) -> ActionId {
        self.action.id
    }

    /// Set the user recorded on the action
    pub fn user(&mut self, user: impl Into<String>) -> &mut Self {
        self.action.user = user.into();
        self
    }

    /// Set the session recorded on the action
    pub fn session(&mut self, session: i64) -> &mut Self {
        self.action.session = session;
        self
    }

    /// Allocate a fresh id from the log's scope
    pub fn new_id(&mut self, kind: ObjectKind) -> ObjectId {
        self.log.get_new_id(kind)
    }

    /// Record an Add of `data` under `parent`
    pub fn add(&mut self, data: Entity, parent: Option<ParentRef>) -> &mut Self {
        let id = self.new_id(ObjectKind::Operation);
        let op = Operation::add(id, data, parent);
        self.push(op)
    }

    /// Record a Delete of `(what, old_id)`
    pub fn delete(&mut self, what: ObjectKind, old_id: ObjectId, parent: Option<ParentRef>) -> &mut Self {
        let id = self.new_id(ObjectKind::Operation);
        let op = Operation::delete(id, what, old_id, parent);
        self.push(op)
    }

    /// Record a Change replacing `old_id` with `data`
    pub fn change(&mut self, old_id: ObjectId, data: Entity, parent: Option<ParentRef>) -> &mut Self {
        let id = self.new_id(ObjectKind::Operation);
        let op = Operation::change(id, old_id, data, parent);
        self.push(op)
    }

    /// Add a plain module and return its id
    pub fn add_module(&mut self, name: &str, package: &str) -> ObjectId {
        let id = self.new_id(ObjectKind::Module);
        self.add(Entity::Module(Module::new(id, name, package)), None);
        id
    }

    /// Add a prebuilt module (group, abstraction or plain) as-is
    pub fn add_node(&mut self, module: Module) -> ObjectId {
        let id = module.id;
        self.add(Entity::Module(module), None);
        id
    }

    /// Add a location to `module_id` and return its id
    pub fn add_location(&mut self, module_id: ObjectId, x: f64, y: f64) -> ObjectId {
        let id = self.new_id(ObjectKind::Location);
        self.add(
            Entity::Location(Location::new(id, x, y)),
            Some(ParentRef::module(module_id)),
        );
        id
    }

    /// Add a function with positional `(type, value)` parameters to `module_id`
    pub fn add_function(&mut self, module_id: ObjectId, name: &str, params: &[(&str, &str)]) -> ObjectId {
        let function = self.build_function(name, params);
        let id = function.id;
        self.add(Entity::Function(function), Some(ParentRef::module(module_id)));
        id
    }

    /// Replace function `old_id` on `module_id` with new parameter values
    pub fn change_function(
        &mut self,
        module_id: ObjectId,
        old_id: ObjectId,
        name: &str,
        params: &[(&str, &str)],
    ) -> ObjectId {
        let function = self.build_function(name, params);
        let id = function.id;
        self.change(old_id, Entity::Function(function), Some(ParentRef::module(module_id)));
        id
    }

    /// Connect two module ports and return the connection id
    pub fn connect(&mut self, source: PortEnd, destination: PortEnd) -> ObjectId {
        let id = self.new_id(ObjectKind::Connection);
        let source = self.build_port(PortRole::Source, source);
        let destination = self.build_port(PortRole::Destination, destination);
        self.add(Entity::Connection(Connection::new(id, source, destination)), None);
        id
    }

    /// Attach an annotation to the action itself
    pub fn annotate(&mut self, key: &str, value: &str) -> &mut Self {
        let id = self.new_id(ObjectKind::Annotation);
        self.action.annotations.push(Annotation::new(id, key, value));
        self
    }

    /// Append the action to the log and make it the current version
    pub fn commit(self) -> Result<ActionId> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let id = self.log.add_action(self.action)?;
        self.log.set_current_version(id)?;
        Ok(id)
    }

    fn build_function(&mut self, name: &str, params: &[(&str, &str)]) -> Function {
        let mut function = Function::new(self.new_id(ObjectKind::Function), name, 0);
        for (pos, (type_name, val)) in params.iter().enumerate() {
            let id = self.new_id(ObjectKind::Parameter);
            function = function.with_parameter(Parameter::new(id, pos as i32, *type_name, *val));
        }
        function
    }

    fn build_port(&mut self, role: PortRole, end: PortEnd) -> Port {
        Port::new(
            self.new_id(ObjectKind::Port),
            role,
            end.module_id,
            end.module_name,
            end.port,
            end.spec,
        )
    }

    fn push(&mut self, op: Result<Operation>) -> &mut Self {
        match op {
            Ok(op) => self.action.operations.push(op),
            Err(err) => {
                if self.error.is_none() {
                    self.error = Some(err);
                }
            }
        }
        self
    }
}
