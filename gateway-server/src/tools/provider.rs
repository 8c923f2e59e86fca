//! Capability provider trait and the builder-based tool registry

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use gateway_protocol::{CapabilitySnapshot, MethodDescriptor, ToolDescriptor};

/// Failure of a tool method
///
/// The `Display` text is what the caller sees in the `-32000` reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// One invocable tool
pub trait ToolHandle: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    fn invoke<'a>(&'a self, method: &'a str, args: Value)
        -> BoxFuture<'a, Result<Value, ToolError>>;
}

/// Source of the tools a bridge session can dispatch to
pub trait CapabilityProvider: Send + Sync {
    /// Descriptor of every tool, keyed by tool name
    fn list_capabilities(&self) -> CapabilitySnapshot;

    fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandle>>;
}

/// Handler behind one tool method
pub type MethodHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// A tool assembled from explicitly registered methods
pub struct Tool {
    descriptor: ToolDescriptor,
    handlers: BTreeMap<String, MethodHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl Tool {
    pub fn builder(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> ToolBuilder {
        ToolBuilder {
            descriptor: ToolDescriptor::new(name, description, version),
            handlers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl ToolHandle for Tool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn invoke<'a>(
        &'a self,
        method: &'a str,
        args: Value,
    ) -> BoxFuture<'a, Result<Value, ToolError>> {
        match self.handlers.get(method) {
            Some(handler) => handler(args),
            None => Box::pin(async move { Err(ToolError::MethodNotFound(method.to_string())) }),
        }
    }
}

/// Registers `(name, descriptor, handler)` entries for one tool
pub struct ToolBuilder {
    descriptor: ToolDescriptor,
    handlers: BTreeMap<String, MethodHandler>,
}

impl ToolBuilder {
    /// Register a method; a later registration under the same name replaces
    /// the earlier one
    pub fn method<F, Fut>(mut self, descriptor: MethodDescriptor, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let name = descriptor.name.clone();
        let handler: MethodHandler = Arc::new(move |args| handler(args).boxed());
        self.descriptor.methods.insert(name.clone(), descriptor);
        self.handlers.insert(name, handler);
        self
    }

    pub fn build(self) -> Tool {
        Tool {
            descriptor: self.descriptor,
            handlers: self.handlers,
        }
    }
}

/// Capability provider backed by an explicit set of tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool of the same name
    pub fn register(&mut self, tool: Tool) -> &mut Self {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.register(tool);
        self
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl CapabilityProvider for ToolRegistry {
    fn list_capabilities(&self) -> CapabilitySnapshot {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.descriptor.clone()))
            .collect()
    }

    fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandle>> {
        self.tools
            .get(name)
            .map(|tool| Arc::clone(tool) as Arc<dyn ToolHandle>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter_tool() -> Tool {
        Tool::builder("counter", "Counts things", "0.2.0")
            .method(
                MethodDescriptor::new("double", "Double a number")
                    .with_parameters(json!({"n": {"type": "number"}})),
                |args| async move {
                    match args.get("n").and_then(Value::as_i64) {
                        Some(n) => Ok(json!(n * 2)),
                        None => Err(ToolError::invalid_arguments("n must be an integer")),
                    }
                },
            )
            .method(MethodDescriptor::new("explode", "Always fails"), |_| async {
                Err(ToolError::failed("kaboom"))
            })
            .build()
    }

    #[test]
    fn test_builder_records_descriptors() {
        let tool = counter_tool();
        let descriptor = tool.descriptor();
        assert_eq!(descriptor.name, "counter");
        assert_eq!(descriptor.version, "0.2.0");
        assert_eq!(descriptor.methods.len(), 2);
        assert!(descriptor.method("double").is_some());
    }

    #[tokio::test]
    async fn test_invoke_dispatches_to_handler() {
        let tool = counter_tool();
        assert_eq!(tool.invoke("double", json!({"n": 21})).await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn test_invoke_reports_handler_errors() {
        let tool = counter_tool();
        let err = tool.invoke("explode", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "kaboom");

        let err = tool.invoke("double", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::InvalidArguments("n must be an integer".into()));
    }

    #[tokio::test]
    async fn test_invoke_unknown_method() {
        let tool = counter_tool();
        let err = tool.invoke("triple", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::MethodNotFound("triple".into()));
    }

    #[test]
    fn test_registry_snapshot_and_lookup() {
        let registry = ToolRegistry::new().with_tool(counter_tool());
        assert_eq!(registry.len(), 1);

        let snapshot = registry.list_capabilities();
        assert_eq!(snapshot["counter"].methods.len(), 2);

        assert!(registry.get_tool("counter").is_some());
        assert!(registry.get_tool("missing").is_none());
    }

    #[test]
    fn test_registry_instances_are_independent() {
        let a = ToolRegistry::new().with_tool(counter_tool());
        let b = ToolRegistry::new();
        assert!(a.get_tool("counter").is_some());
        assert!(b.get_tool("counter").is_none());
    }
}
