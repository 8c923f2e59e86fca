//! Tool capabilities exposed to bridge sessions

pub mod minimal;
pub mod provider;

pub use minimal::{minimal_tool, MINIMAL_TOOL};
pub use provider::{
    CapabilityProvider, MethodHandler, Tool, ToolBuilder, ToolError, ToolHandle, ToolRegistry,
};

/// Registry holding every built-in tool
pub fn default_registry() -> ToolRegistry {
    ToolRegistry::new().with_tool(minimal_tool())
}
