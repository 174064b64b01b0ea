//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use crate::dispatch::ErrorKind;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for toolbridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (map to `client-fault`).
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown tool or resource (map to `client-fault`).
    #[error("not found: {0}")]
    NotFound(String),

    /// A tool name registered twice. Fatal at startup.
    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    /// Invalid or unloadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal errors (map to `internal-fault`).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wire error kind reported to the remote caller.
    pub fn to_wire_kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::NotFound(_) | Error::Serialization(_) => {
                ErrorKind::ClientFault
            }
            Error::DuplicateTool(_) | Error::Config(_) | Error::Internal(_) | Error::Io(_) => {
                ErrorKind::InternalFault
            }
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn duplicate_tool(name: impl Into<String>) -> Self {
        Self::DuplicateTool(name.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_kind_mapping() {
        assert_eq!(
            Error::not_found("Unknown tool: x").to_wire_kind(),
            ErrorKind::ClientFault
        );
        assert_eq!(Error::validation("bad").to_wire_kind(), ErrorKind::ClientFault);
        assert_eq!(Error::internal("boom").to_wire_kind(), ErrorKind::InternalFault);
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::duplicate_tool("echo");
        assert_eq!(err.to_string(), "duplicate tool: echo");
    }
}
