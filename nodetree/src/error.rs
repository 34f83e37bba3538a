use std::fmt::{Display, Formatter};

use serde::Serialize;
use thiserror::Error;

use crate::data::{DataType, ParamValue};
use crate::node::Arity;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown node type \"{0}\"")]
    UnknownType(String),
    #[error("Node type \"{type_name}\" is ambiguous, candidates: {candidates:?}")]
    AmbiguousType {
        type_name: String,
        candidates: Vec<String>,
    },
    #[error("Node type \"{0}\" is already registered")]
    DuplicateType(String),
    #[error("Unknown node module \"{0}\"")]
    UnknownModule(String),
}

/// Structural problems with a graph. A graph that fails construction is
/// never handed out.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstructionError {
    #[error("Duplicate node name \"{0}\"")]
    DuplicateName(String),
    #[error("Node \"{node}\" has an invalid type: {source}")]
    Registry {
        node: String,
        #[source]
        source: RegistryError,
    },
    #[error("Node \"{node}\" references unknown input \"{input}\"")]
    UnresolvedInput { node: String, input: String },
    #[error("Cycle detected at node \"{node}\"")]
    CycleDetected { node: String },
    #[error("Node \"{node}\" expects {expected} inputs, {found} wired")]
    Arity {
        node: String,
        expected: Arity,
        found: usize,
    },
    #[error("Node \"{node}\" has no input slot {slot}")]
    InvalidSlot { node: String, slot: usize },
    #[error("Node \"{0}\" not found")]
    UnknownNode(String),
    #[error("Graph has no node with stage \"{0}\"")]
    MissingStage(String),
    #[error("Graph has no terminal node")]
    NoTerminal,
}

/// A single violated contract found while validating a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    Param {
        node: String,
        param: String,
        value: ParamValue,
        constraint: String,
    },
    UnknownParam {
        node: String,
        param: String,
        value: ParamValue,
    },
    MissingInput {
        node: String,
        slot: usize,
    },
    InputType {
        node: String,
        slot: usize,
        upstream: String,
        expected: DataType,
        found: DataType,
    },
}

/// Every validation issue of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationErrors {
    pub node: String,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("Computation failed at node \"{node}\": {source}")]
    Compute {
        node: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Construction(#[from] ConstructionError),
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

impl EvalError {
    /// Name of the node the failure originated at.
    pub fn node(&self) -> Option<&str> {
        match self {
            EvalError::Validation(errors) => Some(&errors.node),
            EvalError::Compute { node, .. } => Some(node),
            EvalError::Construction(_) => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EvalError::Validation(_))
    }
}

impl Display for ValidationIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::Param {
                node,
                param,
                value,
                constraint,
            } => write!(
                f,
                "{}: parameter \"{}\" = {} must be {}",
                node, param, value, constraint
            ),
            ValidationIssue::UnknownParam { node, param, value } => {
                write!(f, "{}: unknown parameter \"{}\" = {}", node, param, value)
            }
            ValidationIssue::MissingInput { node, slot } => {
                write!(f, "{}: input {} is not connected", node, slot)
            }
            ValidationIssue::InputType {
                node,
                slot,
                upstream,
                expected,
                found,
            } => write!(
                f,
                "{}: input {} expects {}, \"{}\" produces {}",
                node, slot, expected, upstream, found
            ),
        }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let issues: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "{}", issues.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}
