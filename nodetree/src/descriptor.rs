use serde::{Deserialize, Serialize};

use crate::node::Stage;
use crate::param::Params;

/// One entry of a graph description. A graph description is a plain
/// ordered sequence of these, with no envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub inputs: Vec<String>,

    // informational, build resolves the stage from the class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "common::is_false")]
    pub ignored: bool,
    #[serde(
        rename = "__meta",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub meta: Option<serde_json::Value>,
}

impl NodeDescriptor {
    pub fn new(name: &str, type_name: &str) -> Self {
        NodeDescriptor {
            name: name.to_string(),
            type_name: type_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<crate::data::ParamValue>) -> Self {
        self.params.set(key, value.into());
        self
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ParamValue;

    #[test]
    fn wire_format() -> anyhow::Result<()> {
        let json = r#"[
            {"name": "Val1", "type": "Test::Number", "params": [["num", 2]], "inputs": []},
            {"name": "Add", "type": "Test::Arithmetic", "params": [["operator", "+"]],
             "inputs": ["Val1", "Val1"], "ignored": true, "__meta": {"x": 10, "y": 20}}
        ]"#;
        let descriptors: Vec<NodeDescriptor> = serde_json::from_str(json)?;

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].params.get("num"), Some(&ParamValue::Int(2)));
        assert!(!descriptors[0].ignored);
        assert!(descriptors[1].ignored);
        assert_eq!(descriptors[1].inputs, vec!["Val1", "Val1"]);
        assert_eq!(
            descriptors[1].meta,
            Some(serde_json::json!({"x": 10, "y": 20}))
        );

        let value = serde_json::to_value(&descriptors[0])?;
        assert_eq!(
            value,
            serde_json::json!({"name": "Val1", "type": "Test::Number", "params": [["num", 2]], "inputs": []})
        );

        Ok(())
    }

    #[test]
    fn params_and_inputs_default_to_empty() -> anyhow::Result<()> {
        let descriptor: NodeDescriptor =
            serde_json::from_str(r#"{"name": "Val", "type": "Number"}"#)?;
        assert_eq!(descriptor, NodeDescriptor::new("Val", "Number"));

        Ok(())
    }
}
