use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Declared type of a node output or of what an input slot accepts.
///
/// Types are semantic tags checked at validation time against the wiring;
/// they do not describe the in-memory layout of an artifact beyond what
/// [`DataType::admits`] checks after a computation.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Any,
    Null,
    Bool,
    Int,
    Float,
    String,
    Path,
    Image,
    Layout,
    Text,
    List,
    Map,
}

/// An artifact produced by a node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// A scalar parameter value as it appears in a graph description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl DataType {
    /// Whether a slot declared as `self` accepts the output of a node
    /// declared as `produced`.
    pub fn accepts(&self, produced: DataType) -> bool {
        if *self == produced || *self == DataType::Any || produced == DataType::Any {
            return true;
        }

        matches!(
            (self, produced),
            (DataType::Float, DataType::Int)
                | (DataType::String, DataType::Path)
                | (DataType::String, DataType::Text)
        )
    }

    /// Whether a computed artifact is a valid value of this type.
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            DataType::Any => true,
            DataType::Null => matches!(value, Value::Null),
            DataType::Bool => matches!(value, Value::Bool(_)),
            DataType::Int => matches!(value, Value::Int(_)),
            DataType::Float => matches!(value, Value::Float(_) | Value::Int(_)),
            DataType::String | DataType::Path | DataType::Text => {
                matches!(value, Value::String(_))
            }
            DataType::Image => matches!(value, Value::Bytes(_)),
            DataType::Layout | DataType::Map => matches!(value, Value::Map(_)),
            DataType::List => matches!(value, Value::List(_)),
        }
    }
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(value) => Some(value),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Approximate in-memory footprint, used for byte-bounded caches.
    pub fn byte_size(&self) -> usize {
        let own = std::mem::size_of::<Value>();
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => own,
            Value::String(value) => own + value.len(),
            Value::Bytes(value) => own + value.len(),
            Value::List(items) => own + items.iter().map(Value::byte_size).sum::<usize>(),
            Value::Map(map) => {
                own + map
                    .iter()
                    .map(|(key, value)| key.len() + value.byte_size())
                    .sum::<usize>()
            }
        }
    }

    /// Encodes the artifact for writing to a file: raw bytes for images,
    /// UTF-8 for strings, pretty JSON for everything else.
    pub fn to_file_bytes(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            Value::String(text) => Ok(text.as_bytes().to_vec()),
            other => serde_json::to_vec_pretty(other),
        }
    }
}

impl ParamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::String(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(value) => Some(*value),
            _ => None,
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(value) => Some(*value),
            ParamValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(value) => Some(value),
            _ => None,
        }
    }
}

impl Display for ParamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(value) => write!(f, "{}", value),
            ParamValue::Int(value) => write!(f, "{}", value),
            ParamValue::Float(value) => write!(f, "{}", value),
            ParamValue::String(value) => write!(f, "{:?}", value),
        }
    }
}

impl From<ParamValue> for Value {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Bool(value) => Value::Bool(value),
            ParamValue::Int(value) => Value::Int(value),
            ParamValue::Float(value) => Value::Float(value),
            ParamValue::String(value) => Value::String(value),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}
impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}
impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}
impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}
impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}
impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}
impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}
