//! gateway-server: Bridge server for mcp-gateway
//!
//! Accepts authenticated bridge connections, runs a JSON-RPC session per
//! connection against the registered tool capabilities, and stores the log
//! records each session ships back.

pub mod auth;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod http;
pub mod logs;
pub mod state;
pub mod tools;

pub use auth::{AppIdentity, AppRegistry, AuthOutcome};
pub use bridge::{BridgeSession, SessionError, SessionState};
pub use config::{AppConfig, AppEntry, ConfigLoader, ServerConfig};
pub use logs::{LogStore, StoreSink};
pub use state::ServerState;
pub use tools::{default_registry, CapabilityProvider, Tool, ToolRegistry};
