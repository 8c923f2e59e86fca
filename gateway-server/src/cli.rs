//! Command-line argument parsing for the bridge server

use clap::Parser;
use std::path::PathBuf;

/// mcp-gateway bridge server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file
    ///
    /// Defaults to `$XDG_CONFIG_HOME/mcp-gateway/config.toml`. A missing
    /// default file means built-in defaults; a missing explicit file is an
    /// error.
    #[arg(long, short = 'c', env = "MCP_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log to stderr as well as the log file
    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
