use anyhow::{anyhow, bail};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::data::{DataType, ParamValue, Value};
use crate::node::{Arity, ComputeArgs, NodeClass, NodeLambda, NullData, Stage};
use crate::param::{ParamDef, ParamDomain};
use crate::registry::NodeModule;

pub const GROUP: &str = "Test";

#[derive(Debug, Display, EnumIter, EnumString, Copy, Clone, PartialEq, Eq)]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
}

impl Operator {
    fn list_variants() -> Vec<ParamValue> {
        Operator::iter()
            .map(|op| ParamValue::String(op.to_string()))
            .collect()
    }

    /// Integer arithmetic stays integral unless a division leaves a
    /// remainder.
    pub fn apply(&self, a: &Value, b: &Value) -> anyhow::Result<Value> {
        if let (Some(a), Some(b)) = (a.as_int(), b.as_int()) {
            let result = match self {
                Operator::Add => a.checked_add(b),
                Operator::Subtract => a.checked_sub(b),
                Operator::Multiply => a.checked_mul(b),
                Operator::Divide => {
                    if b == 0 {
                        bail!("division by zero");
                    }
                    match a.checked_rem(b) {
                        Some(0) => a.checked_div(b),
                        Some(_) => return Ok(Value::Float(a as f64 / b as f64)),
                        None => None,
                    }
                }
            };
            return result
                .map(Value::Int)
                .ok_or_else(|| anyhow!("integer overflow in {} {} {}", a, self, b));
        }

        let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
            bail!("operands must be numbers, got {} and {}", a.kind(), b.kind());
        };
        let result = match self {
            Operator::Add => a + b,
            Operator::Subtract => a - b,
            Operator::Multiply => a * b,
            Operator::Divide => {
                if b == 0.0 {
                    bail!("division by zero");
                }
                a / b
            }
        };

        Ok(Value::Float(result))
    }
}

pub fn module() -> NodeModule {
    NodeModule::new(GROUP)
        .with(number())
        .with(arithmetic())
        .with(sum())
        .with(text())
}

fn number() -> NodeClass {
    NodeClass {
        name: "Number".to_string(),
        description: Some("Emits a constant number".to_string()),
        stage: Stage::Input,
        arity: Arity::Exact(0),
        output_type: DataType::Float,
        params: vec![ParamDef::new("num", 0, ParamDomain::Number)],
        null_data: NullData::Value(Value::Int(0)),
        lambda: NodeLambda::new(|args: &ComputeArgs<'_>| {
            let num = args
                .params
                .get("num")
                .ok_or_else(|| anyhow!("missing parameter \"num\""))?;
            Ok(Value::from(num.clone()))
        }),
        ..Default::default()
    }
}

fn arithmetic() -> NodeClass {
    NodeClass {
        name: "Arithmetic".to_string(),
        description: Some("Applies a binary operator to two numbers".to_string()),
        stage: Stage::Utils,
        arity: Arity::Exact(2),
        input_types: vec![DataType::Float, DataType::Float],
        output_type: DataType::Float,
        params: vec![ParamDef::new(
            "operator",
            Operator::Add.to_string(),
            ParamDomain::Choice(Operator::list_variants()),
        )],
        lambda: NodeLambda::new(|args: &ComputeArgs<'_>| {
            let operator: Operator = args
                .params
                .get_str("operator")
                .unwrap_or_default()
                .parse()?;
            operator.apply(&args.inputs[0], &args.inputs[1])
        }),
        ..Default::default()
    }
}

fn sum() -> NodeClass {
    NodeClass {
        name: "Sum".to_string(),
        description: Some("Adds any number of inputs".to_string()),
        stage: Stage::Utils,
        arity: Arity::Variable { min: 1 },
        input_types: vec![DataType::Float],
        output_type: DataType::Float,
        lambda: NodeLambda::new(|args: &ComputeArgs<'_>| {
            args.inputs
                .iter()
                .try_fold(Value::Int(0), |total, input| Operator::Add.apply(&total, input))
        }),
        ..Default::default()
    }
}

fn text() -> NodeClass {
    NodeClass {
        name: "Text".to_string(),
        description: Some("Emits a constant string".to_string()),
        stage: Stage::Input,
        arity: Arity::Exact(0),
        output_type: DataType::Text,
        params: vec![ParamDef::new("text", "", ParamDomain::Text)],
        null_data: NullData::Value(Value::String(String::new())),
        lambda: NodeLambda::new(|args: &ComputeArgs<'_>| {
            Ok(Value::String(
                args.params.get_str("text").unwrap_or_default().to_string(),
            ))
        }),
        ..Default::default()
    }
}
