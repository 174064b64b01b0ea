//! Core types for toolbridge.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: caller correlation tokens and dispatcher call ids
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for dispatch, transports and backends

mod config;
mod errors;
mod ids;

pub use config::{
    BackendsConfig, Config, DatabaseConfig, DispatchConfig, HttpConfig, IpcConfig,
    MedicalConfig, ObservabilityConfig, ServerConfig, TerminalConfig, UnknownArgumentPolicy,
};
pub use errors::{Error, Result};
pub use ids::{CallId, CorrelationId};
