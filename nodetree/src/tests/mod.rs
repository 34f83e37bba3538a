use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;

use crate::data::{DataType, Value};
use crate::descriptor::NodeDescriptor;
use crate::elements::test_nodes::Operator;
use crate::node::{Arity, ComputeArgs, NodeClass, NodeLambda};
use crate::registry::{NodeModule, Registry};

mod script_tests;

pub(crate) const ARITHMETIC_JSON: &str = "../test_resources/arithmetic.json";
pub(crate) const ARITHMETIC_YAML: &str = "../test_resources/arithmetic.yml";

/// Built-in registry extended with a `Probe` module whose `Double` node
/// counts its computations.
pub(crate) struct Probe {
    pub registry: Arc<Registry>,
    pub calls: Arc<AtomicUsize>,
}

impl Probe {
    pub fn new() -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut registry = Registry::builtin();
        registry
            .register_module(
                NodeModule::new("Probe")
                    .with(NodeClass {
                        name: "Double".to_string(),
                        arity: Arity::Exact(1),
                        input_types: vec![DataType::Float],
                        output_type: DataType::Float,
                        lambda: NodeLambda::new(move |args: &ComputeArgs<'_>| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Operator::Multiply.apply(&args.inputs[0], &Value::Int(2))
                        }),
                        ..Default::default()
                    })
                    .with(NodeClass {
                        name: "Fail".to_string(),
                        arity: Arity::Exact(1),
                        input_types: vec![DataType::Float],
                        output_type: DataType::Float,
                        lambda: NodeLambda::new(|_: &ComputeArgs<'_>| Err(anyhow!("boom"))),
                        ..Default::default()
                    })
                    .with(NodeClass {
                        name: "Liar".to_string(),
                        arity: Arity::Exact(0),
                        output_type: DataType::Float,
                        lambda: NodeLambda::new(|_: &ComputeArgs<'_>| {
                            Ok(Value::String("not a number".to_string()))
                        }),
                        ..Default::default()
                    }),
            )
            .expect("probe module registers");

        Probe {
            registry: Arc::new(registry),
            calls,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// `Val1 -> Double -> Add <- Val2`, with node names prefixed by `prefix`.
pub(crate) fn doubled_sum(prefix: &str, val1: i64, val2: i64) -> Vec<NodeDescriptor> {
    let name = |base: &str| format!("{}{}", prefix, base);
    vec![
        NodeDescriptor::new(&name("Val1"), "Test::Number").with_param("num", val1),
        NodeDescriptor::new(&name("Val2"), "Test::Number").with_param("num", val2),
        NodeDescriptor::new(&name("Double"), "Probe::Double").with_inputs([name("Val1")]),
        NodeDescriptor::new(&name("Add"), "Test::Arithmetic")
            .with_param("operator", "+")
            .with_inputs([name("Double"), name("Val2")]),
    ]
}
