//! Shared fixtures for unit tests

use crate::action::{ActionId, ROOT_VERSION};
use crate::builder::PortEnd;
use crate::ids::ObjectKind;
use crate::operation::{Entity, ParentRef};
use crate::types::{Connection, Function, Module, Parameter, Port, PortRole, Workflow};
use crate::vistrail::Vistrail;

/// Install a test logger once; repeated calls are harmless
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A log with two branches off a common first version
///
/// ```text
/// v1: Reader(path=in.csv), Writer + mode=w
/// ├── v2: Reader -> Writer, Reader gets a location
/// │   └── v3: path changed to out.csv
/// └── v4: Writer deleted, Filter + expr added
///     └── v5: Reader -> Filter, expr changed
/// ```
///
/// Returns the log and `[v1, v2, v3, v4, v5]`.
pub(crate) fn branching_log() -> (Vistrail, Vec<ActionId>) {
    init_logging();
    let mut log = Vistrail::new("branching");

    let mut b = log.begin_action(ROOT_VERSION);
    b.user("alice");
    let reader = b.new_id(ObjectKind::Module);
    let path = b.new_id(ObjectKind::Function);
    let input = b.new_id(ObjectKind::Parameter);
    b.add_node(Module::new(reader, "Reader", "basic").with_function(
        Function::new(path, "path", 0).with_parameter(Parameter::new(input, 0, "String", "in.csv")),
    ));
    let writer = b.add_module("Writer", "basic");
    b.add_function(writer, "mode", &[("String", "w")]);
    let v1 = b.commit().unwrap();

    let mut b = log.begin_action(v1);
    b.connect(
        PortEnd::new(reader, "Reader", "value").with_spec("(String)"),
        PortEnd::new(writer, "Writer", "value").with_spec("(String)"),
    );
    b.add_location(reader, 0.0, 40.0);
    let v2 = b.commit().unwrap();

    let mut b = log.begin_action(v2);
    let output = b.new_id(ObjectKind::Parameter);
    b.change(
        input,
        Entity::Parameter(Parameter::new(output, 0, "String", "out.csv")),
        Some(ParentRef::function(path)),
    );
    b.annotate("notes", "write elsewhere");
    let v3 = b.commit().unwrap();

    let mut b = log.begin_action(v1);
    b.user("bob");
    b.delete(ObjectKind::Module, writer, None);
    let filter = b.add_module("Filter", "basic");
    let expr = b.add_function(filter, "expr", &[("String", "x > 1")]);
    let v4 = b.commit().unwrap();

    let mut b = log.begin_action(v4);
    b.connect(
        PortEnd::new(reader, "Reader", "value").with_spec("(String)"),
        PortEnd::new(filter, "Filter", "value").with_spec("(String)"),
    );
    b.change_function(filter, expr, "expr", &[("String", "x > 2")]);
    let v5 = b.commit().unwrap();

    (log, vec![v1, v2, v3, v4, v5])
}

/// A log whose only version adds a group wrapping `Source -> Worker`
pub(crate) fn group_log() -> (Vistrail, ActionId) {
    init_logging();
    let mut log = Vistrail::new("grouped");
    let body = Workflow::new()
        .with_module(Module::new(1, "Source", "basic"))
        .with_module(Module::new(2, "Worker", "basic"))
        .with_connection(Connection::new(
            3,
            Port::new(4, PortRole::Source, 1, "Source", "value", "(String)"),
            Port::new(5, PortRole::Destination, 2, "Worker", "value", "(String)"),
        ));

    let mut b = log.begin_action(ROOT_VERSION);
    let group = b.new_id(ObjectKind::Module);
    b.add_node(Module::group(group, "basic", body));
    let v1 = b.commit().unwrap();
    (log, v1)
}
