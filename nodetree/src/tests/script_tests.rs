use std::sync::Arc;

use common::FileFormat;

use crate::cache::NullCache;
use crate::data::{ParamValue, Value};
use crate::descriptor::NodeDescriptor;
use crate::error::{ConstructionError, RegistryError, ValidationIssue};
use crate::node::{Arity, Stage};
use crate::param::Params;
use crate::registry::Registry;
use crate::script::Script;
use crate::tests::{Probe, ARITHMETIC_JSON, ARITHMETIC_YAML};

fn builtin() -> Arc<Registry> {
    Arc::new(Registry::builtin())
}

#[test]
fn create_empty_script() {
    let script = Script::new(builtin());
    assert!(script.is_empty());
    assert!(script.serialize().is_empty());
    assert!(script.get_terminals().is_empty());
}

#[test]
fn add_node_and_get_it_back() -> anyhow::Result<()> {
    let mut script = Script::new(builtin());
    let params: Params = [("num", 2)].into_iter().collect();
    let id = script.add_node("test_nodes.Number", "Val1", params)?;

    assert_eq!(script.serialize().len(), 1);
    let node = script.get_node("Val1").expect("node was added");
    assert_eq!(node.id(), id);
    assert_eq!(node.type_name(), "Test::Number");
    assert_eq!(node.params().get("num"), Some(&ParamValue::Int(2)));

    assert!(matches!(
        script.add_node("Test::Number", "Val1", Params::default()),
        Err(ConstructionError::DuplicateName(name)) if name == "Val1"
    ));

    Ok(())
}

#[test]
fn build_from_file_and_round_trip() -> anyhow::Result<()> {
    let script = Script::from_file(ARITHMETIC_JSON, builtin())?;
    assert_eq!(script.len(), 3);

    let descriptors = script.serialize();
    assert_eq!(descriptors.len(), 3);
    assert_eq!(descriptors[2].inputs, vec!["Val1", "Val2"]);
    assert_eq!(descriptors[2].stage, Some(Stage::Utils));

    let mut rebuilt = Script::build(&descriptors, builtin())?;
    assert_eq!(rebuilt.serialize(), descriptors);
    assert_eq!(*rebuilt.eval_by_name("Add", &NullCache)?, Value::Int(5));

    Ok(())
}

#[test]
fn yaml_and_json_descriptions_agree() -> anyhow::Result<()> {
    let from_json = Script::from_file(ARITHMETIC_JSON, builtin())?;
    let from_yaml = Script::from_file(ARITHMETIC_YAML, builtin())?;
    assert_eq!(from_json.serialize(), from_yaml.serialize());

    let yaml = from_json.to_string(FileFormat::Yaml)?;
    let reparsed = Script::from_yaml(&yaml, builtin())?;
    assert_eq!(reparsed.serialize(), from_json.serialize());

    Ok(())
}

#[test]
fn meta_and_ignored_flag_survive_serialization() -> anyhow::Result<()> {
    let mut script = Script::from_file(ARITHMETIC_JSON, builtin())?;
    let val2 = script.node_id("Val2").expect("Val2 exists");
    script.set_ignored(val2, true)?;

    let json = script.to_string(FileFormat::Json)?;
    let reparsed = Script::from_json(&json, builtin())?;

    let add = reparsed.get_node("Add").expect("Add exists");
    assert_eq!(add.meta(), Some(&serde_json::json!({"x": 240, "y": 80})));
    assert!(reparsed.get_node("Val2").expect("Val2 exists").is_ignored());
    assert!(!reparsed.get_node("Val1").expect("Val1 exists").is_ignored());

    Ok(())
}

#[test]
fn forward_references_and_short_type_names() -> anyhow::Result<()> {
    let mut script = Script::from_file("../test_resources/forward_reference.json", builtin())?;

    assert_eq!(script.get_terminals(), vec![script.node_id("Add").expect("Add")]);
    assert_eq!(*script.eval_by_name("Add", &NullCache)?, Value::Int(20));

    Ok(())
}

#[test]
fn duplicate_names_fail_construction() {
    let err = Script::from_file("../test_resources/duplicate_name.json", builtin())
        .expect_err("duplicate names are rejected");
    assert_eq!(
        err.downcast_ref::<ConstructionError>(),
        Some(&ConstructionError::DuplicateName("Val1".to_string()))
    );
}

#[test]
fn unresolved_input_fails_construction() {
    let err = Script::from_file("../test_resources/unresolved_input.json", builtin())
        .expect_err("unresolved inputs are rejected");
    assert_eq!(
        err.downcast_ref::<ConstructionError>(),
        Some(&ConstructionError::UnresolvedInput {
            node: "Add".to_string(),
            input: "Missing".to_string(),
        })
    );
}

#[test]
fn cycle_fails_construction() {
    let err = Script::from_file("../test_resources/cycle.json", builtin())
        .expect_err("cycles are rejected");
    assert!(matches!(
        err.downcast_ref::<ConstructionError>(),
        Some(ConstructionError::CycleDetected { node }) if node == "A" || node == "B"
    ));
}

#[test]
fn self_reference_fails_construction() {
    let err = Script::from_file("../test_resources/self_reference.json", builtin())
        .expect_err("a node cannot feed itself");
    assert_eq!(
        err.downcast_ref::<ConstructionError>(),
        Some(&ConstructionError::CycleDetected {
            node: "A".to_string()
        })
    );
}

#[test]
fn unknown_type_fails_construction() {
    let descriptors = vec![NodeDescriptor::new("Mystery", "Test::Nope")];
    assert_eq!(
        Script::build(&descriptors, builtin()).unwrap_err(),
        ConstructionError::Registry {
            node: "Mystery".to_string(),
            source: RegistryError::UnknownType("Test::Nope".to_string()),
        }
    );
}

#[test]
fn arity_is_checked_at_construction() {
    let descriptors = vec![
        NodeDescriptor::new("Val1", "Test::Number"),
        NodeDescriptor::new("Add", "Test::Arithmetic").with_inputs(["Val1"]),
    ];
    assert_eq!(
        Script::build(&descriptors, builtin()).unwrap_err(),
        ConstructionError::Arity {
            node: "Add".to_string(),
            expected: Arity::Exact(2),
            found: 1,
        }
    );

    let descriptors = vec![NodeDescriptor::new("Total", "Test::Sum")];
    assert!(matches!(
        Script::build(&descriptors, builtin()),
        Err(ConstructionError::Arity { expected: Arity::Variable { min: 1 }, found: 0, .. })
    ));
}

#[test]
fn terminals_and_parents() -> anyhow::Result<()> {
    let script = Script::from_file(ARITHMETIC_JSON, builtin())?;
    let val1 = script.node_id("Val1").expect("Val1");
    let add = script.node_id("Add").expect("Add");

    assert_eq!(script.get_terminals(), vec![add]);
    assert!(script.has_parents(val1));
    assert!(!script.has_parents(add));
    assert_eq!(script.dependents(val1), &[add]);

    Ok(())
}

#[test]
fn nodes_by_attribute() -> anyhow::Result<()> {
    let script = Script::from_file(ARITHMETIC_JSON, builtin())?;
    let names = |ids: Vec<_>| -> Vec<String> {
        ids.into_iter()
            .filter_map(|id| script.node(id))
            .map(|node| node.name().to_string())
            .collect()
    };

    assert_eq!(names(script.get_nodes_by_attr("stage", "input")), vec!["Val1", "Val2"]);
    assert_eq!(names(script.get_nodes_by_attr("type", "Test::Arithmetic")), vec!["Add"]);
    assert_eq!(names(script.get_nodes_by_attr("group", "Test")).len(), 3);
    assert!(script.get_nodes_by_attr("stage", "recognize").is_empty());
    assert!(script.get_nodes_by_attr("colour", "red").is_empty());

    Ok(())
}

#[test]
fn set_input_rejects_cycles_and_keeps_graph() -> anyhow::Result<()> {
    let probe = Probe::new();
    let mut script = Script::new(probe.registry.clone());
    let val = script.add_node("Test::Number", "Val", Params::default())?;
    let a = script.add_node("Probe::Double", "A", Params::default())?;
    let b = script.add_node("Probe::Double", "B", Params::default())?;
    script.set_input(a, 0, val)?;
    script.set_input(b, 0, a)?;

    assert!(matches!(
        script.set_input(a, 0, b),
        Err(ConstructionError::CycleDetected { node }) if node == "A"
    ));
    assert!(matches!(
        script.set_input(a, 0, a),
        Err(ConstructionError::CycleDetected { .. })
    ));
    assert_eq!(script.node(a).and_then(|node| node.input(0)), Some(val));
    assert_eq!(script.get_terminals(), vec![b]);

    assert!(matches!(
        script.set_input(a, 1, val),
        Err(ConstructionError::InvalidSlot { slot: 1, .. })
    ));

    Ok(())
}

#[test]
fn rewiring_updates_terminals() -> anyhow::Result<()> {
    let mut script = Script::from_file(ARITHMETIC_JSON, builtin())?;
    let extra = script.add_node("Test::Number", "Val3", [("num", 10)].into_iter().collect())?;
    let add = script.node_id("Add").expect("Add");
    let val2 = script.node_id("Val2").expect("Val2");

    assert_eq!(script.get_terminals(), vec![add, extra]);

    script.set_input(add, 1, extra)?;
    assert_eq!(script.get_terminals(), vec![val2, add]);
    assert_eq!(*script.eval(add, &NullCache)?, Value::Int(12));

    Ok(())
}

#[test]
fn variable_arity_grows_one_slot_at_a_time() -> anyhow::Result<()> {
    let mut script = Script::new(builtin());
    let total = script.add_node("Test::Sum", "Total", Params::default())?;
    let mut values = vec![];
    for (idx, num) in [1, 2, 3].into_iter().enumerate() {
        let id = script.add_node(
            "Test::Number",
            &format!("Val{}", idx),
            [("num", num)].into_iter().collect(),
        )?;
        values.push(id);
    }

    script.set_input(total, 0, values[0])?;
    script.set_input(total, 1, values[1])?;
    assert!(matches!(
        script.set_input(total, 3, values[2]),
        Err(ConstructionError::InvalidSlot { slot: 3, .. })
    ));
    script.set_input(total, 2, values[2])?;

    assert_eq!(*script.eval(total, &NullCache)?, Value::Int(6));

    Ok(())
}

#[test]
fn validate_all_collects_issues() -> anyhow::Result<()> {
    let mut script = Script::from_file(ARITHMETIC_JSON, builtin())?;
    assert!(script.validate_all().is_empty());

    let add = script.node_id("Add").expect("Add");
    script.set_param(add, "operator", "!")?;
    script.set_param(add, "precision", 3)?;

    let report = script.validate_all();
    assert_eq!(report.len(), 1);
    let issues = &report["Add"];
    assert_eq!(issues.len(), 2);
    assert!(matches!(&issues[0], ValidationIssue::Param { param, .. } if param == "operator"));
    assert!(matches!(&issues[1], ValidationIssue::UnknownParam { param, .. } if param == "precision"));

    Ok(())
}

#[test]
fn input_types_are_validated() -> anyhow::Result<()> {
    let mut script = Script::new(builtin());
    let text = script.add_node("Test::Text", "Label", [("text", "hi")].into_iter().collect())?;
    let val = script.add_node("Test::Number", "Val", Params::default())?;
    let add = script.add_node("Test::Arithmetic", "Add", Params::default())?;
    script.set_input(add, 0, val)?;

    let issues = script.validate(add);
    assert_eq!(
        issues,
        vec![ValidationIssue::MissingInput {
            node: "Add".to_string(),
            slot: 1,
        }]
    );

    script.set_input(add, 1, text)?;
    assert!(matches!(
        script.validate(add).as_slice(),
        [ValidationIssue::InputType { slot: 1, upstream, .. }] if upstream == "Label"
    ));

    Ok(())
}
