//! Identifiers.
//!
//! `CorrelationId` is the caller's opaque token and is echoed back verbatim.
//! `CallId` is assigned by the dispatcher to every invocation for tracing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Caller-supplied correlation token.
///
/// Any JSON scalar is accepted (the protocols in use send numbers or strings).
/// `null` is reserved for responses to messages whose id could not be decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Value);

impl CorrelationId {
    /// Id used when an inbound message carries no usable id.
    pub fn null() -> Self {
        Self(Value::Null)
    }

    /// Accepts strings and numbers. Objects, arrays and booleans are rejected.
    pub fn from_value(value: Value) -> Result<Self, &'static str> {
        match value {
            Value::String(_) | Value::Number(_) | Value::Null => Ok(Self(value)),
            _ => Err("CorrelationId must be a string or a number"),
        }
    }
}

impl From<u64> for CorrelationId {
    fn from(n: u64) -> Self {
        Self(Value::from(n))
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(Value::from(s))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

/// Dispatcher-assigned invocation id (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(String);

impl CallId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
