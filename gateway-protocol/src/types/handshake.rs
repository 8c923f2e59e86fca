//! Handshake result and connection notices

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool::CapabilitySnapshot;
use crate::messages::{JsonRpcResponse, RequestId};

/// Protocol revision advertised in the handshake result
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Id used for the server's connection-established notice
pub const CONNECTION_NOTICE_ID: &str = "connection";

/// `type` field value of the connection-established notice
pub const CONNECTION_ESTABLISHED: &str = "connection_established";

/// Feature flags advertised by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: bool,
    pub resources: bool,
    pub prompts: bool,
    pub sampling: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: true,
            resources: false,
            prompts: false,
            sampling: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    pub version: String,
    pub capabilities: ServerCapabilities,
}

/// Result of a successful `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResult {
    pub protocol: ProtocolInfo,
    pub tools: CapabilitySnapshot,
}

impl HandshakeResult {
    pub fn new(tools: CapabilitySnapshot) -> Self {
        Self {
            protocol: ProtocolInfo {
                version: PROTOCOL_VERSION.into(),
                capabilities: ServerCapabilities::default(),
            },
            tools,
        }
    }
}

/// Notice sent by the server as soon as a transport connection is accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub connection_id: String,
    pub message: String,
}

impl ConnectionNotice {
    pub fn established(connection_id: impl Into<String>) -> Self {
        Self {
            kind: CONNECTION_ESTABLISHED.into(),
            connection_id: connection_id.into(),
            message: "Bridge connected successfully".into(),
        }
    }

    /// Wrap the notice in the response envelope it travels in
    pub fn into_response(self) -> JsonRpcResponse {
        let result = serde_json::to_value(&self).unwrap_or(Value::Null);
        JsonRpcResponse::success(RequestId::from(CONNECTION_NOTICE_ID), result)
    }

    /// Recognise a notice inside a received response
    pub fn from_response(response: &JsonRpcResponse) -> Option<Self> {
        if response.id.as_str() != CONNECTION_NOTICE_ID {
            return None;
        }
        let notice: Self = serde_json::from_value(response.result.clone()?).ok()?;
        (notice.kind == CONNECTION_ESTABLISHED).then_some(notice)
    }
}
