//! Argument validation against a tool descriptor.
//!
//! `validate` is a pure function: the same descriptor, input and policy always
//! produce the same normalized arguments or the same failure.

use crate::tools::arguments::{ArgValue, Arguments};
use crate::tools::catalog::{ParamKind, ParameterSpec, ToolDescriptor};
use crate::types::UnknownArgumentPolicy;
use serde_json::Value;
use std::fmt;

/// Longest rendering of a rejected value included in a message.
const MAX_RECEIVED_CHARS: usize = 64;

// =============================================================================
// Failures
// =============================================================================

/// Why one parameter was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    MissingRequired,
    TypeMismatch { expected: ParamKind, received: String },
    NotAllowed { received: String, allowed: Vec<String> },
    UnknownParameter,
    NotAnObject { received: String },
}

/// A rejected parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub parameter: String,
    pub kind: IssueKind,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IssueKind::MissingRequired => {
                write!(f, "parameter '{}': missing required parameter", self.parameter)
            }
            IssueKind::TypeMismatch { expected, received } => write!(
                f,
                "parameter '{}': expected {}, received {}",
                self.parameter,
                expected.display_name(),
                received
            ),
            IssueKind::NotAllowed { received, allowed } => write!(
                f,
                "parameter '{}': value {} is not one of: {}",
                self.parameter,
                received,
                allowed.join(", ")
            ),
            IssueKind::UnknownParameter => write!(f, "unknown parameter '{}'", self.parameter),
            IssueKind::NotAnObject { received } => {
                write!(f, "arguments must be an object, received {}", received)
            }
        }
    }
}

/// Every issue found in one argument bag, in descriptor order followed by
/// unknown keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    pub tool: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationFailure {
    pub fn is_missing(&self, parameter: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.parameter == parameter && i.kind == IssueKind::MissingRequired)
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issues: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        write!(f, "invalid arguments for '{}': {}", self.tool, issues.join("; "))
    }
}

impl std::error::Error for ValidationFailure {}

// =============================================================================
// Validation
// =============================================================================

/// Check `raw` against `descriptor` and produce normalized arguments.
///
/// `raw` may be `null` (treated as an empty bag) or an object. Explicit `null`
/// values inside the object count as omitted.
pub fn validate(
    descriptor: &ToolDescriptor,
    raw: &Value,
    policy: UnknownArgumentPolicy,
) -> Result<Arguments, ValidationFailure> {
    let empty = serde_json::Map::new();
    let bag = match raw {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(ValidationFailure {
                tool: descriptor.name.clone(),
                issues: vec![ValidationIssue {
                    parameter: "arguments".to_string(),
                    kind: IssueKind::NotAnObject {
                        received: describe(other),
                    },
                }],
            })
        }
    };

    let mut issues = Vec::new();
    let mut normalized = Arguments::new();

    for spec in &descriptor.parameters {
        match bag.get(&spec.name).filter(|v| !v.is_null()) {
            Some(value) => match coerce(spec, value) {
                Ok(arg) => normalized.insert(spec.name.clone(), arg),
                Err(issue) => issues.push(issue),
            },
            None if spec.required => issues.push(ValidationIssue {
                parameter: spec.name.clone(),
                kind: IssueKind::MissingRequired,
            }),
            None => {
                let arg = match &spec.default {
                    // defaults are checked at registration
                    Some(default) => coerce(spec, default).unwrap_or(ArgValue::Absent),
                    None => ArgValue::Absent,
                };
                normalized.insert(spec.name.clone(), arg);
            }
        }
    }

    for key in bag.keys() {
        if descriptor.parameter(key).is_none() {
            match policy {
                UnknownArgumentPolicy::Strict => issues.push(ValidationIssue {
                    parameter: key.clone(),
                    kind: IssueKind::UnknownParameter,
                }),
                UnknownArgumentPolicy::Lenient => {
                    tracing::debug!(tool = %descriptor.name, parameter = %key, "dropping unknown argument");
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(normalized)
    } else {
        Err(ValidationFailure {
            tool: descriptor.name.clone(),
            issues,
        })
    }
}

/// Check one non-null value against its spec.
pub(crate) fn coerce(spec: &ParameterSpec, value: &Value) -> Result<ArgValue, ValidationIssue> {
    let mismatch = || ValidationIssue {
        parameter: spec.name.clone(),
        kind: IssueKind::TypeMismatch {
            expected: spec.kind,
            received: describe(value),
        },
    };

    let arg = match spec.kind {
        ParamKind::String => ArgValue::String(value.as_str().ok_or_else(mismatch)?.to_string()),
        ParamKind::Integer => ArgValue::Integer(as_integer(value).ok_or_else(mismatch)?),
        ParamKind::Number => ArgValue::Number(value.as_f64().ok_or_else(mismatch)?),
        ParamKind::Boolean => ArgValue::Boolean(value.as_bool().ok_or_else(mismatch)?),
        ParamKind::ArrayOfString => {
            let items = value.as_array().ok_or_else(mismatch)?;
            let strings = items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or_else(mismatch)?;
            ArgValue::StringList(strings)
        }
        ParamKind::Object => ArgValue::Object(value.as_object().ok_or_else(mismatch)?.clone()),
    };

    if let (Some(allowed), ArgValue::String(s)) = (&spec.one_of, &arg) {
        if !allowed.contains(s) {
            return Err(ValidationIssue {
                parameter: spec.name.clone(),
                kind: IssueKind::NotAllowed {
                    received: describe(value),
                    allowed: allowed.clone(),
                },
            });
        }
    }

    Ok(arg)
}

/// Integers, plus floats with no fractional part inside the i64 range.
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if value.is_u64() {
        return None;
    }
    let f = value.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn describe(value: &Value) -> String {
    let type_name = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    let mut rendered = value.to_string();
    if rendered.chars().count() > MAX_RECEIVED_CHARS {
        rendered = rendered.chars().take(MAX_RECEIVED_CHARS).collect::<String>() + "...";
    }
    format!("{} {}", type_name, rendered)
}

// =============================================================================
// Tests
// =============================================================================
