//! Relay endpoints and timings

use std::time::Duration;

use crate::cli::Args;

/// Runtime configuration of the relay
///
/// The timing fields carry production defaults; tests shrink them.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub host: String,
    pub port: u16,
    /// Sleep between idle iterations of the peer loop
    pub poll_interval: Duration,
    /// How long the worker waits for a socket message before sending
    pub recv_timeout: Duration,
    /// Attempts per write to the peer
    pub write_retries: u32,
    pub write_retry_pause: Duration,
    /// Failed writes in a row after which the peer counts as gone
    pub max_write_failures: u32,
    /// How long to wait for in-flight replies after stdin closes
    pub eof_grace: Duration,
    /// Pause before a new connect window
    pub reconnect_backoff: Duration,
    /// Connect attempts per window
    pub connect_attempts: u32,
    pub connect_retry_pause: Duration,
    pub heartbeat_interval: Duration,
    /// Timeout for every HTTP request the relay makes
    pub http_timeout: Duration,
}

impl RelayConfig {
    pub fn new(api_key: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            api_key: api_key.into(),
            host: host.into(),
            port,
            poll_interval: Duration::from_millis(100),
            recv_timeout: Duration::from_millis(100),
            write_retries: 3,
            write_retry_pause: Duration::from_secs(1),
            max_write_failures: 3,
            eof_grace: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(5),
            connect_attempts: 3,
            connect_retry_pause: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            http_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_args(args: &Args) -> Self {
        Self::new(args.api_key.clone(), args.host.clone(), args.port)
    }

    /// WebSocket endpoint of the bridge
    pub fn socket_url(&self) -> String {
        format!("ws://{}:{}/api/bridge/connect", self.host, self.port)
    }

    /// HTTP URL of a server path
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}
