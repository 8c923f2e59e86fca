//! Configuration schema structs

use serde::{Deserialize, Serialize};

use gateway_utils::ShipperConfig;

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log_shipper: ShipperConfig,
    /// Applications allowed to open bridge connections
    pub apps: Vec<AppEntry>,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the single HTTP/WebSocket listener
    pub bind: String,
    /// Upper bound on HTTP request bodies
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.into(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// One registered application and its credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppEntry {
    pub app_id: String,
    #[serde(default)]
    pub name: String,
    pub api_key: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}
