//! Group expansion
//!
//! Groups wrap an embedded sub-workflow, and abstraction references point at
//! a version of a nested log. Expansion inlines both into the surrounding
//! workflow until none remain:
//! - inner modules and connections are copied under fresh scratch ids,
//! - `InputPort`/`OutputPort` proxy modules are elided and the connections
//!   crossing the group boundary are rewired through them,
//! - a function set on the group for one of its input ports overrides the
//!   matching function on the inner module.
//!
//! Every group present at the start of a pass is expanded in that pass, so a
//! workflow with N levels of nesting takes exactly N passes.
//!
//! # Example
//!
//! ```ignore
//! let expanded = expand_groups(&log, &log.materialize(version)?, BASIC_PACKAGE)?;
//! assert!(expanded.workflow().group_ids().is_empty());
//! ```

use std::collections::{BTreeMap, HashMap};

use crate::error::{ProvenanceError, Result};
use crate::ids::{ObjectId, ScratchIds};
use crate::types::{Connection, Function, Module, ModuleKind, Port, PortDirection, Workflow};
use crate::vistrail::Vistrail;

/// Module name of an input boundary proxy
pub const INPUT_PORT: &str = "InputPort";
/// Module name of an output boundary proxy
pub const OUTPUT_PORT: &str = "OutputPort";

/// A workflow with every group and abstraction reference inlined
///
/// Holds scratch ids, so it only exposes read access and cannot be turned
/// back into log operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedWorkflow {
    workflow: Workflow,
    passes: usize,
}

impl ExpandedWorkflow {
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Number of expansion passes that were needed
    pub fn passes(&self) -> usize {
        self.passes
    }
}

/// Inline every group and abstraction reference of `workflow`
///
/// Abstraction references are resolved against `vistrail`'s nested logs.
/// Proxy modules are recognised by their name within `basic_package`.
pub fn expand_groups(vistrail: &Vistrail, workflow: &Workflow, basic_package: &str) -> Result<ExpandedWorkflow> {
    let mut expander = GroupExpander {
        vistrail,
        basic_package,
        scratch: ScratchIds::below(workflow.min_id()),
    };
    let mut workflow = workflow.clone();
    let mut passes = 0;

    loop {
        let groups = workflow.group_ids();
        if groups.is_empty() {
            break;
        }
        for group_id in &groups {
            expander.inline(&mut workflow, *group_id)?;
        }
        passes += 1;
        log::debug!("Expansion pass {}: inlined {} groups", passes, groups.len());
    }

    Ok(ExpandedWorkflow { workflow, passes })
}

/// A boundary port published by a proxy module
#[derive(Debug)]
struct Boundary {
    name: String,
    spec: String,
    old_name: Option<String>,
    /// Inlined ports behind the proxy: destinations for an input, sources
    /// for an output
    endpoints: Vec<Port>,
}

impl Boundary {
    fn accepts(&self, port: &Port) -> bool {
        self.name == port.name
            && (self.spec.is_empty() || port.spec.is_empty() || self.spec == port.spec)
    }
}

struct GroupExpander<'a> {
    vistrail: &'a Vistrail,
    basic_package: &'a str,
    scratch: ScratchIds,
}

impl GroupExpander<'_> {
    fn inline(&mut self, workflow: &mut Workflow, group_id: ObjectId) -> Result<()> {
        let inner = match workflow.module(group_id).map(|m| &m.kind) {
            Some(ModuleKind::Group { workflow: body }) => (**body).clone(),
            Some(ModuleKind::Abstraction {
                abstraction_id,
                internal_version,
            }) => find_abstraction(self.vistrail, *abstraction_id)
                .ok_or(ProvenanceError::UnknownAbstraction(*abstraction_id))?
                .materialize(*internal_version)?,
            Some(ModuleKind::Plain) | None => return Ok(()),
        };
        let Some(group) = workflow.modules.remove(&group_id) else {
            return Ok(());
        };

        let mut ids: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut inputs: BTreeMap<ObjectId, Boundary> = BTreeMap::new();
        let mut outputs: BTreeMap<ObjectId, Boundary> = BTreeMap::new();

        for module in inner.modules.values() {
            match self.proxy_of(module) {
                Some((PortDirection::Input, boundary)) => {
                    inputs.insert(module.id, boundary);
                }
                Some((PortDirection::Output, boundary)) => {
                    outputs.insert(module.id, boundary);
                }
                None => {
                    let id = self.scratch.next_id();
                    ids.insert(module.id, id);
                    workflow.modules.insert(id, Module { id, ..module.clone() });
                }
            }
        }

        for connection in inner.connections.values() {
            let (Some(source), Some(destination)) = (connection.source(), connection.destination()) else {
                log::warn!("Skipping half-connected connection {} in group {}", connection.id, group_id);
                continue;
            };
            if let Some(boundary) = inputs.get_mut(&source.module_id) {
                match remap_port(destination, &ids) {
                    Some(port) => boundary.endpoints.push(port),
                    None => log::warn!("Group {}: input '{}' feeds a proxy directly", group_id, boundary.name),
                }
            } else if let Some(boundary) = outputs.get_mut(&destination.module_id) {
                match remap_port(source, &ids) {
                    Some(port) => boundary.endpoints.push(port),
                    None => log::warn!("Group {}: output '{}' is fed by a proxy", group_id, boundary.name),
                }
            } else {
                let mut copy = connection.clone();
                copy.id = self.scratch.next_id();
                for port in &mut copy.ports {
                    port.module_id = ids.get(&port.module_id).copied().unwrap_or(port.module_id);
                }
                workflow.connections.insert(copy.id, copy);
            }
        }

        self.rewire_boundary(workflow, group_id, &inputs, &outputs)?;
        self.override_functions(workflow, &group, &inputs)?;

        log::debug!(
            "Inlined group {} ({} modules, {} inputs, {} outputs)",
            group_id,
            ids.len(),
            inputs.len(),
            outputs.len()
        );
        Ok(())
    }

    fn proxy_of(&self, module: &Module) -> Option<(PortDirection, Boundary)> {
        if module.package != self.basic_package {
            return None;
        }
        let direction = match module.name.as_str() {
            INPUT_PORT => PortDirection::Input,
            OUTPUT_PORT => PortDirection::Output,
            _ => return None,
        };
        let value = |name: &str| {
            module
                .function_by_name(name)
                .and_then(Function::first_value)
                .map(str::to_string)
        };
        Some((
            direction,
            Boundary {
                name: value("name").unwrap_or_default(),
                spec: value("spec").unwrap_or_default(),
                old_name: value("old_name"),
                endpoints: Vec::new(),
            },
        ))
    }

    /// Replace every connection touching the group with connections to the
    /// ports behind its proxies
    fn rewire_boundary(
        &mut self,
        workflow: &mut Workflow,
        group_id: ObjectId,
        inputs: &BTreeMap<ObjectId, Boundary>,
        outputs: &BTreeMap<ObjectId, Boundary>,
    ) -> Result<()> {
        let crossing: Vec<Connection> = workflow
            .connections
            .values()
            .filter(|c| c.touches(group_id))
            .cloned()
            .collect();

        for connection in crossing {
            workflow.connections.remove(&connection.id);
            let sources = endpoints(connection.source(), group_id, outputs, "output")?;
            let destinations = endpoints(connection.destination(), group_id, inputs, "input")?;
            if sources.is_empty() || destinations.is_empty() {
                log::warn!(
                    "Dropping connection {} across group {}: no inner endpoint",
                    connection.id,
                    group_id
                );
                continue;
            }
            for source in &sources {
                for destination in &destinations {
                    let id = self.scratch.next_id();
                    let source = Port {
                        id: self.scratch.next_id(),
                        ..source.clone()
                    };
                    let destination = Port {
                        id: self.scratch.next_id(),
                        ..destination.clone()
                    };
                    workflow.connections.insert(id, Connection::new(id, source, destination));
                }
            }
        }
        Ok(())
    }

    /// Copy the group's port functions onto the inlined modules behind its
    /// input proxies
    fn override_functions(
        &mut self,
        workflow: &mut Workflow,
        group: &Module,
        inputs: &BTreeMap<ObjectId, Boundary>,
    ) -> Result<()> {
        for function in &group.functions {
            let Some(boundary) = inputs.values().find(|b| b.name == function.name) else {
                continue;
            };
            for endpoint in &boundary.endpoints {
                let name = boundary.old_name.clone().unwrap_or_else(|| endpoint.name.clone());
                let Some(target) = workflow.module_mut(endpoint.module_id) else {
                    continue;
                };
                let copy = Function {
                    id: self.scratch.next_id(),
                    name: name.clone(),
                    ..function.clone()
                };
                target.remove_functions_named(&name);
                target.insert_function(copy)?;
            }
        }
        Ok(())
    }
}

/// Ports a connection end resolves to once the group is inlined
fn endpoints(
    port: Option<&Port>,
    group_id: ObjectId,
    boundaries: &BTreeMap<ObjectId, Boundary>,
    direction: &'static str,
) -> Result<Vec<Port>> {
    match port {
        None => Ok(Vec::new()),
        Some(port) if port.module_id != group_id => Ok(vec![port.clone()]),
        Some(port) => boundaries
            .values()
            .find(|b| b.accepts(port))
            .map(|b| b.endpoints.clone())
            .ok_or_else(|| ProvenanceError::MalformedGroupBoundary {
                group_id,
                direction,
                port: port.name.clone(),
                spec: port.spec.clone(),
            }),
    }
}

fn remap_port(port: &Port, ids: &HashMap<ObjectId, ObjectId>) -> Option<Port> {
    ids.get(&port.module_id).map(|&module_id| Port {
        module_id,
        ..port.clone()
    })
}

/// Look an abstraction up in `log` and, failing that, in its nested logs
fn find_abstraction(log: &Vistrail, id: ObjectId) -> Option<&Vistrail> {
    log.abstraction(id)
        .or_else(|| log.abstractions().find_map(|nested| find_abstraction(nested, id)))
}
