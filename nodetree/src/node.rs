use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::data::{DataType, Value};
use crate::fingerprint::Fingerprint;
use crate::param::{ParamDef, Params, ResolvedParams};

/// Role of a node in an OCR pipeline. Used for introspection only, never
/// for execution order. Variants are declared in pipeline order.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Input,
    FilterGray,
    Binarize,
    FilterBinary,
    PageSegment,
    Recognize,
    #[default]
    Utils,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arity {
    Exact(usize),
    Variable { min: usize },
}

/// Arguments handed to a node's primitive computation.
#[derive(Debug)]
pub struct ComputeArgs<'a> {
    pub node: &'a str,
    pub params: &'a ResolvedParams,
    pub inputs: &'a [Arc<Value>],
}

pub type NodeLambdaFn = dyn Fn(&ComputeArgs<'_>) -> anyhow::Result<Value> + Send + Sync;

#[derive(Clone, Default)]
pub enum NodeLambda {
    #[default]
    None,
    Lambda(Arc<NodeLambdaFn>),
}

/// What an ignored node yields instead of computing.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub enum NullData {
    #[default]
    FirstInput,
    Value(Value),
}

/// Declared contract and implementation of a node type.
#[derive(Clone, Debug, Serialize)]
pub struct NodeClass {
    pub group: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub stage: Stage,
    pub arity: Arity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_types: Vec<DataType>,
    pub output_type: DataType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamDef>,
    // results of non-cacheable nodes are memoized but never stored
    pub cacheable: bool,
    pub null_data: NullData,

    #[serde(skip)]
    pub lambda: NodeLambda,
}

/// Stable handle of a node within its script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    pub source: NodeId,
    pub output_idx: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultOrigin {
    Computed,
    CacheHit,
    Ignored,
}

#[derive(Clone, Debug, Default)]
pub enum NodeState {
    #[default]
    Unevaluated,
    Invalidated,
    ValidationFailed,
    ComputeFailed,
    Valid {
        artifact: Arc<Value>,
        fingerprint: Fingerprint,
        origin: ResultOrigin,
    },
}

/// A node instance inside a script.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) class: Arc<NodeClass>,
    pub(crate) params: Params,
    pub(crate) inputs: Vec<Option<InputBinding>>,
    pub(crate) ignored: bool,
    pub(crate) meta: Option<serde_json::Value>,
    pub(crate) state: NodeState,
}

impl Arity {
    pub fn admits(&self, count: usize) -> bool {
        match self {
            Arity::Exact(expected) => count == *expected,
            Arity::Variable { min } => count >= *min,
        }
    }

    pub fn min(&self) -> usize {
        match self {
            Arity::Exact(count) => *count,
            Arity::Variable { min } => *min,
        }
    }
}

impl Display for Arity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Arity::Exact(count) => write!(f, "{}", count),
            Arity::Variable { min } => write!(f, "at least {}", min),
        }
    }
}

impl NodeLambda {
    pub fn new<F>(lambda: F) -> Self
    where
        F: Fn(&ComputeArgs<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::Lambda(Arc::new(lambda))
    }

    pub fn invoke(&self, args: &ComputeArgs<'_>) -> anyhow::Result<Value> {
        match self {
            NodeLambda::None => Err(anyhow::anyhow!(
                "node \"{}\" has no computation attached",
                args.node
            )),
            NodeLambda::Lambda(inner) => (inner)(args),
        }
    }
}

impl Debug for NodeLambda {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeLambda::None => write!(f, "NodeLambda::None"),
            NodeLambda::Lambda(_) => write!(f, "NodeLambda::Lambda"),
        }
    }
}

impl Default for NodeClass {
    fn default() -> Self {
        NodeClass {
            group: String::new(),
            name: String::new(),
            description: None,
            stage: Stage::default(),
            arity: Arity::Exact(0),
            input_types: vec![],
            output_type: DataType::Any,
            params: vec![],
            cacheable: true,
            null_data: NullData::default(),
            lambda: NodeLambda::None,
        }
    }
}

impl NodeClass {
    /// Namespaced type name, `Group::Name`.
    pub fn type_name(&self) -> String {
        format!("{}::{}", self.group, self.name)
    }

    /// Accepted type of an input slot. Variable-arity classes repeat their
    /// last declared input type.
    pub fn input_type(&self, slot: usize) -> DataType {
        self.input_types
            .get(slot)
            .or_else(|| match self.arity {
                Arity::Variable { .. } => self.input_types.last(),
                Arity::Exact(_) => None,
            })
            .copied()
            .unwrap_or(DataType::Any)
    }
}

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        NodeId(index)
    }
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl NodeState {
    pub fn is_valid(&self) -> bool {
        matches!(self, NodeState::Valid { .. })
    }
}

impl Node {
    pub(crate) fn new(name: &str, class: Arc<NodeClass>, params: Params) -> Node {
        Node {
            id: NodeId::default_unassigned(),
            name: name.to_string(),
            inputs: vec![None; class.arity.min()],
            class,
            params,
            ignored: false,
            meta: None,
            state: NodeState::Unevaluated,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn class(&self) -> &NodeClass {
        &self.class
    }
    pub fn type_name(&self) -> String {
        self.class.type_name()
    }
    pub fn stage(&self) -> Stage {
        self.class.stage
    }
    pub fn params(&self) -> &Params {
        &self.params
    }
    pub fn resolved_params(&self) -> ResolvedParams {
        self.params.resolve(&self.class.params)
    }
    pub fn inputs(&self) -> &[Option<InputBinding>] {
        &self.inputs
    }
    pub fn input(&self, slot: usize) -> Option<NodeId> {
        self.inputs
            .get(slot)
            .copied()
            .flatten()
            .map(|binding| binding.source)
    }
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }
    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }
    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Memoized result, absent until the node is evaluated and clean.
    pub fn result(&self) -> Option<&Arc<Value>> {
        match &self.state {
            NodeState::Valid { artifact, .. } => Some(artifact),
            _ => None,
        }
    }
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match &self.state {
            NodeState::Valid { fingerprint, .. } => Some(*fingerprint),
            _ => None,
        }
    }
    pub fn is_dirty(&self) -> bool {
        !self.state.is_valid()
    }

    pub(crate) fn invalidate(&mut self) {
        if !matches!(self.state, NodeState::Unevaluated) {
            self.state = NodeState::Invalidated;
        }
    }
}

impl NodeId {
    fn default_unassigned() -> Self {
        NodeId(usize::MAX)
    }
}
