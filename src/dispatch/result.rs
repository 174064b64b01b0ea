//! Normalized invocation outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::types::Error;

/// Error taxonomy reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Unknown tool or invalid arguments. Never retried.
    ClientFault,
    /// The backend reported a failure.
    ProviderError,
    /// The execution budget expired.
    Timeout,
    /// Unexpected failure inside the dispatcher or a crashed invocation.
    InternalFault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ClientFault => "client-fault",
            ErrorKind::ProviderError => "provider-error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InternalFault => "internal-fault",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error half of a [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ToolError {
    pub fn client_fault(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::ClientFault,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind: ErrorKind::ProviderError,
            message: message.into(),
            retryable,
        }
    }

    pub fn timeout(tool: &str, budget: Duration) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            message: format!(
                "tool '{}' exceeded its execution budget of {:?}",
                tool, budget
            ),
            retryable: true,
        }
    }

    /// A request the dispatcher refused before any provider ran.
    pub fn rejected(err: &Error) -> Self {
        Self {
            kind: err.to_wire_kind(),
            message: err.to_string(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InternalFault,
            message: message.into(),
            retryable: false,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Exactly one of these is produced per request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Ok(Value),
    Err(ToolError),
}

impl ToolResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResult::Ok(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ToolResult::Ok(value) => Some(value),
            ToolResult::Err(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ToolError> {
        match self {
            ToolResult::Ok(_) => None,
            ToolResult::Err(err) => Some(err),
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(ErrorKind::ClientFault).unwrap(),
            serde_json::json!("client-fault")
        );
        assert_eq!(ErrorKind::ProviderError.as_str(), "provider-error");
        assert_eq!(ErrorKind::InternalFault.to_string(), "internal-fault");
    }

    #[test]
    fn test_timeout_is_always_retryable() {
        let err = ToolError::timeout("run_command", Duration::from_millis(1500));
        assert!(err.retryable);
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("1.5s"));
    }

    #[test]
    fn test_rejected_maps_error_kind() {
        let unknown = ToolError::rejected(&Error::not_found("Unknown tool: missing"));
        assert_eq!(unknown.kind, ErrorKind::ClientFault);
        assert!(!unknown.retryable);
        assert!(unknown.message.contains("missing"));

        let broken = ToolError::rejected(&Error::internal("registry corrupted"));
        assert_eq!(broken.kind, ErrorKind::InternalFault);
    }

    #[test]
    fn test_client_fault_is_never_retryable() {
        assert!(!ToolError::client_fault("bad").retryable);
    }
}
