//! Tool integration.
//!
//! The `Tool` capability interface, its typed parameter schema, the shared
//! registry that selects a tool for a step, and a couple of built-in tools.

#![warn(missing_docs)]

pub mod r#trait;
pub mod registry;
pub mod builtin;

pub use r#trait::{
    InvocationContext, ParamType, Parameter, Tool, ToolDescriptor, ToolError, ToolInput,
    ToolParams, ToolSchema,
};
pub use registry::{RegistryError, SelectionStrategy, ToolRegistry};
pub use builtin::{CommandTool, EchoTool};
