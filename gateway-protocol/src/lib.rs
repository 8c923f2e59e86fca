//! gateway-protocol: Shared wire definitions for mcp-gateway
//!
//! This crate defines the JSON-RPC envelope spoken between the local peer,
//! the relay and the bridge server, the capability and log payloads carried
//! inside it, content fingerprints, and the newline-delimited framing used
//! on stdio.

pub mod codec;
pub mod fingerprint;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{encode_line, CodecError, Frame, JsonLineCodec};
pub use fingerprint::{
    canonical_json, content_hash, fingerprint_response, fingerprint_value, lifecycle_fingerprint,
    Fingerprint,
};
pub use messages::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestError, RequestId, JSONRPC_VERSION,
};
pub use types::{
    CapabilitySnapshot, ConnectionNotice, HandshakeResult, LogBatch, LogLevel, LogPage, LogQuery,
    LogRecord, MethodDescriptor, ProtocolInfo, ServerCapabilities, StoredLogRecord,
    ToolDescriptor, CONNECTION_ESTABLISHED, CONNECTION_NOTICE_ID, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT,
    PROTOCOL_VERSION,
};

/// Method name of the handshake request
pub const INITIALIZE_METHOD: &str = "initialize";

/// Header carrying the API key on every HTTP and WebSocket request
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Header naming the relay process behind an HTTP-fallback request
///
/// The server keys fallback sessions on the app plus this value, so each
/// relay process gets its own handshake.
pub const RELAY_SESSION_HEADER: &str = "X-Relay-Session";

/// WebSocket close code signalling an authentication failure
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;
