//! # toolbridge - tool-serving core
//!
//! Exposes backend capabilities (SQL stores, HTTP endpoints, external data
//! APIs, shell commands) as named tools behind one dispatcher:
//! - Schema registry of tool descriptors, immutable after startup
//! - Argument validation into typed argument bags
//! - Dispatch with per-call deadlines, cancellation and fault isolation
//! - Capability providers grouped into toolkits
//! - Length-prefixed msgpack (TCP) and newline JSON (stdio, MCP) transports
//!
//! ## Architecture
//!
//! ```text
//!   transport  →  decode  →  ┌──────────────── Dispatcher ────────────────┐
//!   (tcp/stdio)              │ lookup → validate → execute (deadline)     │
//!                            │   ToolRegistry        CapabilityProvider   │
//!                            └────────────────────────────────────────────┘
//!                                         ↓ exactly one correlated response
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod dispatch;
pub mod ipc;
pub mod providers;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};
