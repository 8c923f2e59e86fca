//! JSON-RPC 2.0 message types
//!
//! Requests are validated by hand rather than derived so that a malformed
//! message still yields whatever id could be recovered from it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// JSON-RPC version string carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

// ==================== Request IDs ====================

/// Request identifier, always carried as a string on the wire
///
/// Callers may send numeric ids; they are stringified on the way in so that
/// every response echoes a string id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    /// Create an id from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Recover an id from an arbitrary JSON value
    ///
    /// Strings and numbers are accepted; anything else has no usable id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// The empty id used when none could be parsed
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value).unwrap_or_default())
    }
}

// ==================== Requests ====================

/// Reasons a message could not be turned into a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The bytes were not JSON at all
    #[error("Parse error: {0}")]
    Parse(String),

    /// Valid JSON that is not a well-formed request
    #[error("Invalid Request: {reason}")]
    Invalid { id: RequestId, reason: &'static str },
}

impl RequestError {
    /// The id to answer with (empty when none was recoverable)
    pub fn id(&self) -> RequestId {
        match self {
            Self::Parse(_) => RequestId::empty(),
            Self::Invalid { id, .. } => id.clone(),
        }
    }

    /// Build the error reply for a local peer
    ///
    /// Unparseable bytes are reported as `-32700`, structural problems as
    /// `-32600`.
    pub fn to_response(&self) -> JsonRpcResponse {
        let error = match self {
            Self::Parse(msg) => {
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, format!("Parse error: {}", msg))
            }
            Self::Invalid { .. } => JsonRpcError::invalid_request(),
        };
        JsonRpcResponse::error(self.id(), error)
    }
}

/// A validated JSON-RPC 2.0 request
///
/// `id` is `None` for notifications, which never receive a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    /// Create a request with an id
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: None,
            id: Some(id.into()),
        }
    }

    /// Create a notification (no id)
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params: None,
            id: None,
        }
    }

    /// Attach params
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Parse and validate a raw line
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RequestError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-decoded JSON value
    ///
    /// The version may be spelled `jsonrpc` or `version`; it must be `"2.0"`.
    pub fn from_value(value: Value) -> Result<Self, RequestError> {
        let Value::Object(mut obj) = value else {
            return Err(RequestError::Invalid {
                id: RequestId::empty(),
                reason: "message is not an object",
            });
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(v) => match RequestId::from_value(&v) {
                Some(id) => Some(id),
                None => {
                    return Err(RequestError::Invalid {
                        id: RequestId::empty(),
                        reason: "id must be a string or number",
                    })
                }
            },
        };
        let invalid = |reason| RequestError::Invalid {
            id: id.clone().unwrap_or_default(),
            reason,
        };

        let version = obj.remove("jsonrpc").or_else(|| obj.remove("version"));
        match version {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(_) => return Err(invalid("unsupported version")),
            None => return Err(invalid("missing version")),
        }

        let method = match obj.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => m,
            Some(_) => return Err(invalid("method must be a non-empty string")),
            None => return Err(invalid("missing method")),
        };

        let params = match obj.remove("params") {
            None | Some(Value::Null) => None,
            Some(p @ Value::Object(_)) => Some(p),
            Some(_) => return Err(invalid("params must be an object")),
        };

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method,
            params,
            id,
        })
    }

    /// True when the request carries no id
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// True when params are present and non-empty
    pub fn has_params(&self) -> bool {
        match &self.params {
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// Params as an argument map (absent params become an empty map)
    pub fn arguments(&self) -> Value {
        match &self.params {
            Some(p) => p.clone(),
            None => Value::Object(Map::new()),
        }
    }

    /// Split `tool.method` into its two parts
    pub fn tool_method(&self) -> Option<(&str, &str)> {
        self.method.split_once('.')
    }
}

// ==================== Responses ====================

/// JSON-RPC 2.0 response
///
/// Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn default_version() -> String {
    JSONRPC_VERSION.into()
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Parse a response received from a remote peer
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Error code, if this is an error response
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }

    /// Serialize to a single JSON line (no trailing newline)
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new JSON-RPC error with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// The canonical malformed-message error
    pub fn invalid_request() -> Self {
        Self::new(Self::INVALID_REQUEST, "Invalid Request")
    }

    /// Parse error: invalid JSON was received (local peer only)
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request: the JSON sent is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method or tool not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;
    /// Initialization-state violation
    pub const INIT_STATE: i32 = -32002;
    /// Internal or handler error
    pub const SERVER_ERROR: i32 = -32000;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request_with_string_id() {
        let req = JsonRpcRequest::parse(r#"{"jsonrpc":"2.0","method":"initialize","id":"1"}"#)
            .unwrap();
        assert_eq!(req.method, "initialize");
        assert_eq!(req.id, Some(RequestId::from("1")));
        assert!(req.params.is_none());
    }

    #[test]
    fn test_parse_request_accepts_version_spelling() {
        let req =
            JsonRpcRequest::parse(r#"{"version":"2.0","method":"initialize","id":"1"}"#).unwrap();
        assert_eq!(req.jsonrpc, "2.0");
    }

    #[test]
    fn test_parse_request_numeric_id_is_stringified() {
        let req = JsonRpcRequest::parse(r#"{"jsonrpc":"2.0","method":"a.b","id":42}"#).unwrap();
        assert_eq!(req.id, Some(RequestId::from("42")));
    }

    #[test]
    fn test_parse_request_without_id_is_notification() {
        let req = JsonRpcRequest::parse(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_parse_request_missing_method() {
        let err = JsonRpcRequest::parse(r#"{"jsonrpc":"2.0","id":"7"}"#).unwrap_err();
        assert!(matches!(err, RequestError::Invalid { .. }));
        assert_eq!(err.id().as_str(), "7");
    }

    #[test]
    fn test_parse_request_missing_version() {
        let err = JsonRpcRequest::parse(r#"{"method":"x","id":"3"}"#).unwrap_err();
        assert!(matches!(err, RequestError::Invalid { reason: "missing version", .. }));
    }

    #[test]
    fn test_parse_request_wrong_version() {
        let err = JsonRpcRequest::parse(r#"{"jsonrpc":"1.0","method":"x"}"#).unwrap_err();
        assert_eq!(err.id(), RequestId::empty());
        assert_eq!(err.to_response().error_code(), Some(JsonRpcError::INVALID_REQUEST));
    }

    #[test]
    fn test_parse_request_not_json() {
        let err = JsonRpcRequest::parse("{not json").unwrap_err();
        assert!(matches!(err, RequestError::Parse(_)));
        let resp = err.to_response();
        assert_eq!(resp.error_code(), Some(JsonRpcError::PARSE_ERROR));
        assert_eq!(resp.id.as_str(), "");
    }

    #[test]
    fn test_parse_request_rejects_array_params() {
        let err = JsonRpcRequest::parse(r#"{"jsonrpc":"2.0","method":"x","params":[1],"id":"9"}"#)
            .unwrap_err();
        assert_eq!(err.id().as_str(), "9");
    }

    #[test]
    fn test_has_params() {
        let empty = JsonRpcRequest::new("1", "initialize").with_params(json!({}));
        assert!(!empty.has_params());
        let full = JsonRpcRequest::new("1", "initialize").with_params(json!({"a": 1}));
        assert!(full.has_params());
    }

    #[test]
    fn test_tool_method_split() {
        let req = JsonRpcRequest::new("1", "minimal.echo");
        assert_eq!(req.tool_method(), Some(("minimal", "echo")));
        let plain = JsonRpcRequest::new("1", "doesnotexist");
        assert_eq!(plain.tool_method(), None);
    }

    #[test]
    fn test_response_numeric_id_serializes_as_string() {
        let resp = JsonRpcResponse::success(7u64, json!({"ok": true}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], json!("7"));
        assert_eq!(value["jsonrpc"], json!("2.0"));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_error_response_omits_result() {
        let resp = JsonRpcResponse::error("2", JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, "nope"));
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], json!(-32601));
    }

    #[test]
    fn test_response_parse_numeric_id() {
        let resp = JsonRpcResponse::parse(r#"{"jsonrpc":"2.0","id":5,"result":{}}"#).unwrap();
        assert_eq!(resp.id.as_str(), "5");
    }
}
