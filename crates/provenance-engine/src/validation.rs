//! Structural validation of materialized workflows
//!
//! Checks that every connection has both ends and that both ends point at
//! modules present in the same workflow, and that the dataflow is acyclic.
//! Group bodies are validated recursively.

use std::collections::{BTreeMap, VecDeque};

use crate::ids::ObjectId;
use crate::types::{ModuleKind, PortRole, Workflow};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A connection lacks its source or destination port
    MissingPort {
        connection_id: ObjectId,
        role: PortRole,
    },
    /// A port references a module that is not in the workflow
    DanglingPort {
        connection_id: ObjectId,
        module_id: ObjectId,
    },
    /// A port caches a module name that differs from the module's
    StaleModuleName {
        connection_id: ObjectId,
        module_id: ObjectId,
        cached: String,
        actual: String,
    },
    /// The connections form a cycle through these modules
    CycleDetected { module_ids: Vec<ObjectId> },
    /// An error inside the embedded workflow of a group
    InGroup {
        group_id: ObjectId,
        error: Box<ValidationError>,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPort {
                connection_id,
                role,
            } => write!(f, "Connection {} has no {:?} port", connection_id, role),
            Self::DanglingPort {
                connection_id,
                module_id,
            } => write!(
                f,
                "Connection {} references unknown module {}",
                connection_id, module_id
            ),
            Self::StaleModuleName {
                connection_id,
                module_id,
                cached,
                actual,
            } => write!(
                f,
                "Connection {} names module {} '{}' but it is '{}'",
                connection_id, module_id, cached, actual
            ),
            Self::CycleDetected { module_ids } => {
                write!(f, "Cycle detected through modules {:?}", module_ids)
            }
            Self::InGroup { group_id, error } => write!(f, "In group {}: {}", group_id, error),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a workflow and every group body inside it
///
/// Returns all validation errors found (not just the first).
pub fn validate_workflow(workflow: &Workflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_connections(workflow, &mut errors);
    detect_cycles(workflow, &mut errors);

    for module in workflow.modules.values() {
        if let ModuleKind::Group { workflow: body } = &module.kind {
            errors.extend(
                validate_workflow(body)
                    .into_iter()
                    .map(|error| ValidationError::InGroup {
                        group_id: module.id,
                        error: Box::new(error),
                    }),
            );
        }
    }

    errors
}

fn validate_connections(workflow: &Workflow, errors: &mut Vec<ValidationError>) {
    for connection in workflow.connections.values() {
        for role in [PortRole::Source, PortRole::Destination] {
            let Some(port) = connection.port(role) else {
                errors.push(ValidationError::MissingPort {
                    connection_id: connection.id,
                    role,
                });
                continue;
            };
            match workflow.module(port.module_id) {
                None => errors.push(ValidationError::DanglingPort {
                    connection_id: connection.id,
                    module_id: port.module_id,
                }),
                Some(module) if !port.module_name.is_empty() && port.module_name != module.name => {
                    errors.push(ValidationError::StaleModuleName {
                        connection_id: connection.id,
                        module_id: module.id,
                        cached: port.module_name.clone(),
                        actual: module.name.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }
}

/// Kahn's algorithm over module-to-module edges; whatever never reaches
/// in-degree zero sits on or behind a cycle
fn detect_cycles(workflow: &Workflow, errors: &mut Vec<ValidationError>) {
    let mut in_degree: BTreeMap<ObjectId, usize> = workflow.modules.keys().map(|id| (*id, 0)).collect();
    let mut edges: BTreeMap<ObjectId, Vec<ObjectId>> = BTreeMap::new();

    for connection in workflow.connections.values() {
        let (Some(source), Some(destination)) = (connection.source(), connection.destination()) else {
            continue;
        };
        if !in_degree.contains_key(&source.module_id) {
            continue;
        }
        if let Some(degree) = in_degree.get_mut(&destination.module_id) {
            *degree += 1;
            edges.entry(source.module_id).or_default().push(destination.module_id);
        }
    }

    let mut queue: VecDeque<ObjectId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    while let Some(id) = queue.pop_front() {
        for next in edges.get(&id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    let module_ids: Vec<ObjectId> = in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(id, _)| id)
        .collect();
    if !module_ids.is_empty() {
        errors.push(ValidationError::CycleDetected { module_ids });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Connection, Module, Port};

    fn connect(id: ObjectId, src: ObjectId, dst: ObjectId) -> Connection {
        Connection::new(
            id,
            Port::new(id * 10, PortRole::Source, src, "", "out", ""),
            Port::new(id * 10 + 1, PortRole::Destination, dst, "", "in", ""),
        )
    }

    fn chain() -> Workflow {
        Workflow::new()
            .with_module(Module::new(1, "A", "basic"))
            .with_module(Module::new(2, "B", "basic"))
            .with_module(Module::new(3, "C", "basic"))
            .with_connection(connect(1, 1, 2))
            .with_connection(connect(2, 2, 3))
    }

    #[test]
    fn test_valid_workflow() {
        assert!(validate_workflow(&chain()).is_empty());
        assert!(validate_workflow(&Workflow::new()).is_empty());
    }

    #[test]
    fn test_dangling_and_missing_ports() {
        let mut half = connect(4, 1, 2);
        half.ports.retain(|p| p.role == PortRole::Source);
        let workflow = chain().with_connection(connect(3, 3, 9)).with_connection(half);

        let errors = validate_workflow(&workflow);
        assert_eq!(
            errors,
            vec![
                ValidationError::DanglingPort {
                    connection_id: 3,
                    module_id: 9
                },
                ValidationError::MissingPort {
                    connection_id: 4,
                    role: PortRole::Destination
                },
            ]
        );
    }

    #[test]
    fn test_stale_module_name() {
        let workflow = Workflow::new()
            .with_module(Module::new(1, "A", "basic"))
            .with_module(Module::new(2, "B", "basic"))
            .with_connection(Connection::new(
                1,
                Port::new(1, PortRole::Source, 1, "A", "out", ""),
                Port::new(2, PortRole::Destination, 2, "Renamed", "in", ""),
            ));
        let errors = validate_workflow(&workflow);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("'Renamed'"));
    }

    #[test]
    fn test_cycle_detection() {
        let workflow = chain()
            .with_module(Module::new(4, "D", "basic"))
            .with_connection(connect(3, 3, 2))
            .with_connection(connect(4, 3, 4));
        let errors = validate_workflow(&workflow);
        assert_eq!(
            errors,
            vec![ValidationError::CycleDetected {
                module_ids: vec![2, 3, 4]
            }]
        );
    }

    #[test]
    fn test_group_body_is_validated() {
        let body = Workflow::new()
            .with_module(Module::new(1, "A", "basic"))
            .with_connection(connect(1, 1, 5));
        let workflow = Workflow::new().with_module(Module::group(7, "basic", body));

        let errors = validate_workflow(&workflow);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            ValidationError::InGroup { group_id: 7, error } if matches!(**error, ValidationError::DanglingPort { module_id: 5, .. })
        ));
    }
}
