//! Per-connection protocol state machine

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use gateway_protocol::{
    CapabilitySnapshot, HandshakeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    INITIALIZE_METHOD,
};
use gateway_utils::{FlushOutcome, LogShipper};

use super::connection::Connection;
use super::error::SessionError;
use crate::tools::CapabilityProvider;

/// Lifecycle of a bridge session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Initialized,
    /// Terminal; every later message is ignored
    Closed,
}

/// Owns one connection's protocol state
///
/// Messages are handled strictly one at a time through `&mut self`.
pub struct BridgeSession {
    connection: Connection,
    state: SessionState,
    provider: Arc<dyn CapabilityProvider>,
    snapshot: Option<CapabilitySnapshot>,
    shipper: LogShipper,
}

impl std::fmt::Debug for BridgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeSession")
            .field("connection", &self.connection)
            .field("state", &self.state)
            .finish()
    }
}

impl BridgeSession {
    pub fn new(
        connection: Connection,
        provider: Arc<dyn CapabilityProvider>,
        shipper: LogShipper,
    ) -> Self {
        Self {
            connection,
            state: SessionState::AwaitingHandshake,
            provider,
            snapshot: None,
            shipper,
        }
    }

    /// Start background log flushing and record the connection
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        self.shipper.start();
        self.shipper.info(
            "Bridge connection established",
            Some(json!({
                "app_id": self.connection.app.app_id,
                "app_name": self.connection.app.name,
            })),
        );
        info!(
            connection_id = %self.connection.connection_id,
            app_id = %self.connection.app.app_id,
            "Bridge session started"
        );
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_id(&self) -> &str {
        &self.connection.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == SessionState::Initialized
    }

    /// Capabilities captured by the handshake
    pub fn capabilities(&self) -> Option<&CapabilitySnapshot> {
        self.snapshot.as_ref()
    }

    pub fn shipper(&self) -> &LogShipper {
        &self.shipper
    }

    /// Record liveness; never changes state
    pub fn heartbeat(&mut self) {
        self.connection.last_heartbeat = Utc::now();
    }

    /// Handle one raw message, returning the reply to send (if any)
    pub async fn on_message(&mut self, raw: &str) -> Option<JsonRpcResponse> {
        if self.state == SessionState::Closed {
            debug!(connection_id = %self.connection.connection_id, "Ignoring message on closed session");
            return None;
        }

        match JsonRpcRequest::parse(raw) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(self.reject_malformed(e.id(), &e.to_string())),
        }
    }

    /// Handle an already-decoded JSON message
    pub async fn on_value(&mut self, value: Value) -> Option<JsonRpcResponse> {
        if self.state == SessionState::Closed {
            return None;
        }

        match JsonRpcRequest::from_value(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(self.reject_malformed(e.id(), &e.to_string())),
        }
    }

    /// Handle a validated request
    ///
    /// Notifications are processed but never answered.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if self.state == SessionState::Closed {
            return None;
        }

        debug!(
            connection_id = %self.connection.connection_id,
            method = %request.method,
            id = ?request.id,
            "Handling request"
        );

        let outcome = self.dispatch(&request).await;
        if let Err(ref e) = outcome {
            let error = JsonRpcError::from(e.clone());
            warn!(
                connection_id = %self.connection.connection_id,
                method = %request.method,
                code = error.code,
                error = %error.message,
                "Request failed"
            );
            self.shipper.warning(
                "Request failed",
                Some(json!({
                    "method": request.method,
                    "code": error.code,
                    "error": error.message,
                })),
            );
        }

        let id = request.id?;
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::error(id, e.into()),
        })
    }

    async fn dispatch(&mut self, request: &JsonRpcRequest) -> Result<Value, SessionError> {
        if request.method == INITIALIZE_METHOD {
            return self.handshake(request);
        }

        if self.state != SessionState::Initialized {
            return Err(SessionError::NotInitialized);
        }

        let Some((tool_name, method_name)) = request.tool_method() else {
            return Err(SessionError::MethodNotFound(request.method.clone()));
        };

        let descriptor = self
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.get(tool_name))
            .ok_or_else(|| SessionError::ToolNotFound(tool_name.to_string()))?;
        if descriptor.method(method_name).is_none() {
            return Err(SessionError::MethodNotFound(method_name.to_string()));
        }

        let tool = self
            .provider
            .get_tool(tool_name)
            .ok_or_else(|| SessionError::ToolNotFound(tool_name.to_string()))?;

        let invocation = AssertUnwindSafe(tool.invoke(method_name, request.arguments()));
        let result = match invocation.catch_unwind().await {
            Ok(result) => result?,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(
                    connection_id = %self.connection.connection_id,
                    method = %request.method,
                    error = %message,
                    "Tool handler panicked"
                );
                return Err(SessionError::Handler(message));
            }
        };
        self.shipper.info(
            "Method executed",
            Some(json!({ "method": request.method })),
        );
        Ok(result)
    }

    fn handshake(&mut self, request: &JsonRpcRequest) -> Result<Value, SessionError> {
        if self.state == SessionState::Initialized {
            return Err(SessionError::AlreadyInitialized);
        }
        if request.has_params() {
            return Err(SessionError::HandshakeParams);
        }

        let snapshot = self.provider.list_capabilities();
        let result = serde_json::to_value(HandshakeResult::new(snapshot.clone()))
            .map_err(|e| SessionError::Handler(e.to_string()))?;

        self.snapshot = Some(snapshot);
        self.state = SessionState::Initialized;

        info!(
            connection_id = %self.connection.connection_id,
            tools = self.snapshot.as_ref().map_or(0, |s| s.len()),
            "Bridge session initialized"
        );
        self.shipper.info("Session initialized", None);
        Ok(result)
    }

    fn reject_malformed(&self, id: gateway_protocol::RequestId, reason: &str) -> JsonRpcResponse {
        warn!(
            connection_id = %self.connection.connection_id,
            reason = %reason,
            "Rejecting malformed message"
        );
        self.shipper
            .warning("Invalid request", Some(json!({ "reason": reason })));
        JsonRpcResponse::error(id, SessionError::InvalidRequest.into())
    }

    /// Close the session and perform a bounded final log flush
    pub async fn close(&mut self) -> FlushOutcome {
        if self.state == SessionState::Closed {
            return FlushOutcome::Empty;
        }
        self.state = SessionState::Closed;

        info!(connection_id = %self.connection.connection_id, "Bridge session closed");
        self.shipper.info("Bridge connection closed", None);
        self.shipper.stop().await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "tool handler panicked".to_string()
    }
}
