//! Normalized, schema-checked argument bags handed to providers.

use crate::types::{Error, Result};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// One normalized argument value.
///
/// `Absent` is an explicit marker for an optional parameter that was omitted
/// and has no default. It is distinct from `false`, `0` or an empty string.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Absent,
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
    StringList(Vec<String>),
    Object(Map<String, Value>),
}

impl ArgValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, ArgValue::Absent)
    }

    fn kind_name(&self) -> &'static str {
        match self {
            ArgValue::Absent => "absent",
            ArgValue::String(_) => "string",
            ArgValue::Integer(_) => "integer",
            ArgValue::Number(_) => "number",
            ArgValue::Boolean(_) => "boolean",
            ArgValue::StringList(_) => "array-of-string",
            ArgValue::Object(_) => "object",
        }
    }

    /// JSON rendering. `Absent` has none.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            ArgValue::Absent => None,
            ArgValue::String(s) => Some(Value::String(s.clone())),
            ArgValue::Integer(n) => Some(Value::from(*n)),
            ArgValue::Number(n) => Some(Value::from(*n)),
            ArgValue::Boolean(b) => Some(Value::Bool(*b)),
            ArgValue::StringList(items) => Some(Value::from(items.clone())),
            ArgValue::Object(map) => Some(Value::Object(map.clone())),
        }
    }
}

/// Arguments keyed by parameter name, in descriptor order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: IndexMap<String, ArgValue>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: ArgValue) {
        self.values.insert(name.into(), value);
    }

    /// Value for `name`; undeclared names read as `Absent`.
    pub fn get(&self, name: &str) -> &ArgValue {
        self.values.get(name).unwrap_or(&ArgValue::Absent)
    }

    pub fn is_present(&self, name: &str) -> bool {
        !self.get(name).is_absent()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// JSON object of all present arguments.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .filter_map(|(k, v)| v.to_json().map(|json| (k.clone(), json)))
            .collect();
        Value::Object(map)
    }

    // -------------------------------------------------------------------------
    // Typed accessors. A mismatch here means the provider disagrees with its own
    // descriptor, which is an internal fault rather than a caller mistake.
    // -------------------------------------------------------------------------

    pub fn str(&self, name: &str) -> Result<&str> {
        self.opt_str(name)?
            .ok_or_else(|| mismatch(name, "string", &ArgValue::Absent))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            ArgValue::Absent => Ok(None),
            ArgValue::String(s) => Ok(Some(s.as_str())),
            other => Err(mismatch(name, "string", other)),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        self.opt_int(name)?
            .ok_or_else(|| mismatch(name, "integer", &ArgValue::Absent))
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            ArgValue::Absent => Ok(None),
            ArgValue::Integer(n) => Ok(Some(*n)),
            other => Err(mismatch(name, "integer", other)),
        }
    }

    pub fn number(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            ArgValue::Number(n) => Ok(*n),
            ArgValue::Integer(n) => Ok(*n as f64),
            other => Err(mismatch(name, "number", other)),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            ArgValue::Boolean(b) => Ok(*b),
            other => Err(mismatch(name, "boolean", other)),
        }
    }

    pub fn str_list(&self, name: &str) -> Result<&[String]> {
        match self.get(name) {
            ArgValue::StringList(items) => Ok(items.as_slice()),
            other => Err(mismatch(name, "array-of-string", other)),
        }
    }

    pub fn object(&self, name: &str) -> Result<&Map<String, Value>> {
        match self.get(name) {
            ArgValue::Object(map) => Ok(map),
            other => Err(mismatch(name, "object", other)),
        }
    }
}

fn mismatch(name: &str, wanted: &str, found: &ArgValue) -> Error {
    Error::internal(format!(
        "argument '{}' read as {} but is {}",
        name,
        wanted,
        found.kind_name()
    ))
}
