//! Command-line argument parsing for the relay
//!
//! Uses clap for argument parsing with derive macros.

use clap::Parser;
use std::path::PathBuf;

/// mcp-gateway relay: carries a stdio JSON-RPC peer over the bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// API key presented to the bridge server
    #[arg(long, env = "MCP_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Bridge server host
    #[arg(long, env = "MCP_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bridge server port
    #[arg(long, env = "MCP_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Single-instance lock file
    ///
    /// Defaults to `$XDG_RUNTIME_DIR/mcp-gateway/relay.lock`.
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Keep relay events local instead of shipping them to the server
    ///
    /// Events are still mirrored to the local fallback file.
    #[arg(long, default_value_t = false)]
    pub no_log_shipping: bool,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Lock file to use, falling back to the runtime default
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(gateway_utils::relay_lock_file)
    }
}
