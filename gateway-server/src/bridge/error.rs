//! Bridge session error types

use gateway_protocol::JsonRpcError;

use crate::tools::ToolError;

/// Reasons a request could not be served
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid Request")]
    InvalidRequest,

    #[error("Server not initialized")]
    NotInitialized,

    #[error("Server already initialized")]
    AlreadyInitialized,

    #[error("Invalid params: initialize request does not accept parameters")]
    HandshakeParams,

    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Tool '{0}' not found")]
    ToolNotFound(String),

    /// A tool handler failed; the text is the handler's own message
    #[error("{0}")]
    Handler(String),
}

impl From<ToolError> for SessionError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::MethodNotFound(method) => SessionError::MethodNotFound(method),
            other => SessionError::Handler(other.to_string()),
        }
    }
}

impl From<SessionError> for JsonRpcError {
    fn from(err: SessionError) -> Self {
        let code = match err {
            SessionError::InvalidRequest => JsonRpcError::INVALID_REQUEST,
            SessionError::NotInitialized | SessionError::AlreadyInitialized => {
                JsonRpcError::INIT_STATE
            }
            SessionError::HandshakeParams => JsonRpcError::INVALID_PARAMS,
            SessionError::MethodNotFound(_) | SessionError::ToolNotFound(_) => {
                JsonRpcError::METHOD_NOT_FOUND
            }
            SessionError::Handler(_) => JsonRpcError::SERVER_ERROR,
        };
        JsonRpcError::new(code, err.to_string())
    }
}
