use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::data::ParamValue;
use crate::error::ValidationIssue;

/// Set of values a parameter may take.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParamDomain {
    Any,
    Text,
    Bool,
    Number,
    Choice(Vec<ParamValue>),
    IntRange { min: i64, max: i64 },
    FloatRange { min: f64, max: f64 },
    Path { must_exist: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub default: ParamValue,
    pub domain: ParamDomain,
}

/// Parameter values set on a node instance, in the order they were set.
/// A repeated key keeps its first position and its last value.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(Vec<(String, ParamValue)>);

/// Parameters with class defaults applied, ordered by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedParams(BTreeMap<String, ParamValue>);

impl ParamDomain {
    /// Checks `value` against the domain, returning the violated constraint.
    pub fn check(&self, value: &ParamValue) -> Result<(), String> {
        let ok = match (self, value) {
            (ParamDomain::Any, _) => true,
            (ParamDomain::Text, ParamValue::String(_)) => true,
            (ParamDomain::Bool, ParamValue::Bool(_)) => true,
            (ParamDomain::Number, ParamValue::Int(_) | ParamValue::Float(_)) => true,
            (ParamDomain::Choice(options), value) => options.contains(value),
            (ParamDomain::IntRange { min, max }, ParamValue::Int(value)) => {
                (*min..=*max).contains(value)
            }
            (ParamDomain::FloatRange { min, max }, value) => value
                .as_f64()
                .is_some_and(|value| value >= *min && value <= *max),
            (ParamDomain::Path { must_exist }, ParamValue::String(path)) => {
                !path.is_empty() && (!*must_exist || std::path::Path::new(path).exists())
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(self.describe())
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ParamDomain::Any => "any value".to_string(),
            ParamDomain::Text => "a string".to_string(),
            ParamDomain::Bool => "a boolean".to_string(),
            ParamDomain::Number => "a number".to_string(),
            ParamDomain::Choice(options) => {
                let options: Vec<String> = options.iter().map(ToString::to_string).collect();
                format!("one of [{}]", options.join(", "))
            }
            ParamDomain::IntRange { min, max } => {
                format!("an integer in [{}, {}]", min, max)
            }
            ParamDomain::FloatRange { min, max } => format!("a number in [{}, {}]", min, max),
            ParamDomain::Path { must_exist: true } => "a path to an existing file".to_string(),
            ParamDomain::Path { must_exist: false } => "a non-empty path".to_string(),
        }
    }
}

impl ParamDef {
    pub fn new(name: &str, default: impl Into<ParamValue>, domain: ParamDomain) -> Self {
        ParamDef {
            name: name.to_string(),
            default: default.into(),
            domain,
        }
    }

    pub fn choice<I, V>(name: &str, default: impl Into<ParamValue>, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        Self::new(
            name,
            default,
            ParamDomain::Choice(options.into_iter().map(Into::into).collect()),
        )
    }
}

impl Params {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Stores a value, replacing an earlier one of the same name in place.
    pub fn set(&mut self, name: &str, value: ParamValue) {
        match self.0.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn resolve(&self, defs: &[ParamDef]) -> ResolvedParams {
        let mut resolved: BTreeMap<String, ParamValue> = defs
            .iter()
            .map(|def| (def.name.clone(), def.default.clone()))
            .collect();
        for (key, value) in self.0.iter() {
            resolved.insert(key.clone(), value.clone());
        }

        ResolvedParams(resolved)
    }

    /// Reports every parameter that is undeclared or outside its domain.
    pub fn validate(&self, node: &str, defs: &[ParamDef]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for def in defs.iter() {
            let value = self.get(&def.name).unwrap_or(&def.default);
            if let Err(constraint) = def.domain.check(value) {
                issues.push(ValidationIssue::Param {
                    node: node.to_string(),
                    param: def.name.clone(),
                    value: value.clone(),
                    constraint,
                });
            }
        }

        for (key, value) in self.iter() {
            if !defs.iter().any(|def| def.name == key) {
                issues.push(ValidationIssue::UnknownParam {
                    node: node.to_string(),
                    param: key.to_string(),
                    value: value.clone(),
                });
            }
        }

        issues
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Params::default();
        for (key, value) in iter {
            params.set(&key.into(), value.into());
        }
        params
    }
}

impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(String, ParamValue)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_int)
    }
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_f64)
    }
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }
}
