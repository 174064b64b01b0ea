//! Dispatch core: provider interface, execution context, outcome envelope.

pub mod dispatcher;
pub mod provider;
pub mod result;

pub use dispatcher::{Dispatcher, DispatcherBuilder, ToolRequest, ToolResponse};
pub use provider::{
    provider_fn, CallContext, CapabilityProvider, FnProvider, ProviderError, ToolBinding,
};
pub use result::{ErrorKind, ToolError, ToolResult};
