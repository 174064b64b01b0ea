//! Schema registry: tool descriptors, parameter specs, ordered catalog.
//!
//! Owns tool *metadata* only. Implementations live behind
//! [`CapabilityProvider`](crate::dispatch::CapabilityProvider) bindings held by
//! the dispatcher.

use crate::tools::validation::coerce;
use crate::types::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

// =============================================================================
// Parameter kinds
// =============================================================================

/// Accepted value kind for a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    ArrayOfString,
    Object,
}

impl ParamKind {
    /// Name used in validation messages and discovery output.
    pub fn display_name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::ArrayOfString => "array-of-string",
            ParamKind::Object => "object",
        }
    }

    fn json_schema(&self) -> Value {
        match self {
            ParamKind::String => json!({"type": "string"}),
            ParamKind::Integer => json!({"type": "integer"}),
            ParamKind::Number => json!({"type": "number"}),
            ParamKind::Boolean => json!({"type": "boolean"}),
            ParamKind::ArrayOfString => json!({"type": "array", "items": {"type": "string"}}),
            ParamKind::Object => json!({"type": "object"}),
        }
    }
}

// =============================================================================
// Parameter spec
// =============================================================================

/// A single parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Closed set of accepted values (string parameters only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<String>>,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
            default: None,
            one_of: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    /// Value used when the caller omits the parameter.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.one_of = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = self.kind.json_schema();
        if let Some(obj) = schema.as_object_mut() {
            if !self.description.is_empty() {
                obj.insert("description".to_string(), json!(self.description));
            }
            if let Some(values) = &self.one_of {
                obj.insert("enum".to_string(), json!(values));
            }
            if let Some(default) = &self.default {
                obj.insert("default".to_string(), default.clone());
            }
        }
        schema
    }

    fn check(&self, tool: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation(format!(
                "Tool '{}' declares a parameter with an empty name",
                tool
            )));
        }
        if self.required && self.default.is_some() {
            return Err(Error::validation(format!(
                "Tool '{}': required parameter '{}' cannot have a default",
                tool, self.name
            )));
        }
        if self.one_of.is_some() && self.kind != ParamKind::String {
            return Err(Error::validation(format!(
                "Tool '{}': one_of is only supported for string parameters ('{}')",
                tool, self.name
            )));
        }
        if let Some(default) = &self.default {
            coerce(self, default).map_err(|failure| {
                Error::validation(format!("Tool '{}': invalid default: {}", tool, failure))
            })?;
        }
        Ok(())
    }
}

// =============================================================================
// Tool descriptor
// =============================================================================

/// Complete description of one tool. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter (declaration order is validation order).
    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Render the parameter list as a JSON Schema object.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.parameters {
            properties.insert(spec.name.clone(), spec.json_schema());
            if spec.required {
                required.push(json!(spec.name));
            }
        }

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), Value::Array(required));
        }
        Value::Object(schema)
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Ordered, immutable-after-startup tool catalog.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    entries: IndexMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Register a descriptor. Duplicate names are an error, never an overwrite.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::validation("Tool name cannot be empty"));
        }
        if self.entries.contains_key(&descriptor.name) {
            return Err(Error::duplicate_tool(descriptor.name));
        }

        let mut seen = HashSet::new();
        for spec in &descriptor.parameters {
            spec.check(&descriptor.name)?;
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::validation(format!(
                    "Tool '{}' declares parameter '{}' twice",
                    descriptor.name, spec.name
                )));
            }
        }

        self.entries.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Get a descriptor by name.
    pub fn lookup(&self, name: &str) -> Result<&ToolDescriptor> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::not_found(format!("Unknown tool: {}", name)))
    }

    /// All descriptors in registration order.
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.entries.values().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
