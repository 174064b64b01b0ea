//! Transports in front of the dispatcher.
//!
//! - `server`: TCP with length-prefixed msgpack frames (`codec`).
//! - `lines`: newline-delimited JSON over any byte stream (stdio), speaking
//!   either the native messages (`protocol`) or JSON-RPC (`mcp`).

pub mod codec;
pub mod lines;
pub mod mcp;
pub mod protocol;
pub mod server;

pub use lines::{serve_lines, serve_stdio, LineProtocol};
pub use mcp::ServerInfo;
pub use protocol::{Inbound, Outbound, Rejection};
pub use server::IpcServer;
