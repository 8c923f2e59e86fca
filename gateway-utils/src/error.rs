//! Error types for mcp-gateway
//!
//! Provides a unified error type used across all gateway crates.

use std::path::PathBuf;

/// Main error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection timeout after {seconds}s")]
    ConnectionTimeout { seconds: u64 },

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    // === Protocol Errors ===

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    // === Instance Errors ===

    #[error("another instance running (pid {pid})")]
    AnotherInstance { pid: u32 },

    #[error("Failed to lock {path}: {source}")]
    LockFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Log Delivery Errors ===

    #[error("Log delivery failed: {0}")]
    Delivery(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an authentication error
    pub fn auth_rejected(msg: impl Into<String>) -> Self {
        Self::AuthRejected(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a log delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
            | Self::Connection(_)
            | Self::ConnectionClosed
            | Self::Delivery(_)
        )
    }

    /// Check if this error means the credential itself was refused
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthRejected(_))
    }
}

/// Result type alias using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Display Tests ====================

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = GatewayError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_display_file_write() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied");
        let err = GatewayError::FileWrite {
            path: PathBuf::from("/var/log/bridge.log"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("Failed to write file"));
        assert!(msg.contains("/var/log/bridge.log"));
    }

    #[test]
    fn test_error_display_connection() {
        let err = GatewayError::Connection("refused".into());
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_error_display_auth_rejected() {
        let err = GatewayError::auth_rejected("close code 4001");
        assert_eq!(err.to_string(), "Authentication rejected: close code 4001");
    }

    #[test]
    fn test_error_display_another_instance() {
        let err = GatewayError::AnotherInstance { pid: 4242 };
        assert_eq!(err.to_string(), "another instance running (pid 4242)");
    }

    #[test]
    fn test_error_display_config_invalid() {
        let err = GatewayError::ConfigInvalid {
            path: PathBuf::from("/home/user/.config/mcp-gateway/config.toml"),
            message: "syntax error".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Invalid configuration"));
        assert!(msg.contains("config.toml"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_error_display_delivery() {
        let err = GatewayError::delivery("HTTP 503");
        assert_eq!(err.to_string(), "Log delivery failed: HTTP 503");
    }

    // ==================== Retryable Tests ====================

    #[test]
    fn test_retryable() {
        assert!(GatewayError::ConnectionTimeout { seconds: 5 }.is_retryable());
        assert!(GatewayError::connection("refused").is_retryable());
        assert!(GatewayError::ConnectionClosed.is_retryable());
        assert!(GatewayError::delivery("timeout").is_retryable());
    }

    #[test]
    fn test_auth_failure_is_not_retryable() {
        let err = GatewayError::auth_rejected("HTTP 403");
        assert!(!err.is_retryable());
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_not_retryable_errors() {
        let non_retryable = [
            GatewayError::Protocol("error".into()),
            GatewayError::InvalidMessage("bad".into()),
            GatewayError::Config("bad".into()),
            GatewayError::ConfigNotFound(PathBuf::from("/test")),
            GatewayError::AnotherInstance { pid: 1 },
            GatewayError::Internal("error".into()),
        ];

        for err in non_retryable {
            assert!(
                !err.is_retryable(),
                "Expected {:?} to NOT be retryable",
                err
            );
        }
    }

    // ==================== From Trait Tests ====================

    #[test]
    fn test_from_io_error_preserves_kind() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: GatewayError = io_err.into();
        if let GatewayError::Io(inner) = err {
            assert_eq!(inner.kind(), std::io::ErrorKind::PermissionDenied);
        } else {
            panic!("Expected Io variant");
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: GatewayError = json_err.into();
        assert!(matches!(err, GatewayError::Json(_)));
    }
}
