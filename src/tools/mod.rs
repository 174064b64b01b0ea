//! Tool infrastructure: schema registry, argument validation, normalized
//! argument bags.
//!
//! Everything here is pure data plus pure functions. Side effects live in
//! [`providers`](crate::providers) behind the dispatcher.

pub mod arguments;
pub mod catalog;
pub mod validation;

pub use arguments::{ArgValue, Arguments};
pub use catalog::{ParamKind, ParameterSpec, ToolDescriptor, ToolRegistry};
pub use validation::{validate, IssueKind, ValidationFailure, ValidationIssue};
