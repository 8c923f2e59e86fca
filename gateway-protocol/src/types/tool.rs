//! Tool capability descriptors

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a single callable method on a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema-ish map of parameter name to description
    #[serde(rename = "parameters")]
    pub parameter_schema: Value,
    #[serde(rename = "returns")]
    pub return_schema: Value,
    pub is_async: bool,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema: Value::Object(Default::default()),
            return_schema: serde_json::json!({"type": "any"}),
            is_async: true,
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameter_schema = schema;
        self
    }

    pub fn with_returns(mut self, schema: Value) -> Self {
        self.return_schema = schema;
        self
    }
}

/// Description of a tool and all of its methods
///
/// Methods are kept in a sorted map so snapshots serialize deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    pub methods: BTreeMap<String, MethodDescriptor>,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: version.into(),
            methods: BTreeMap::new(),
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }
}

/// Snapshot of every tool a provider exposes, keyed by tool name
pub type CapabilitySnapshot = BTreeMap<String, ToolDescriptor>;
