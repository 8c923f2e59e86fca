//! gateway-utils: Shared utilities for mcp-gateway
//!
//! Error types, logging setup, XDG paths and the buffered log shipper used
//! by both the bridge server and the relay.

pub mod error;
pub mod logging;
pub mod paths;
pub mod shipper;

pub use error::{GatewayError, Result};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogOutput};
pub use paths::{
    config_dir, config_file, ensure_dir, fallback_log_file, log_dir, relay_lock_file,
    runtime_dir, state_dir,
};
pub use shipper::{FallbackStore, FlushOutcome, LogShipper, LogSink, NullSink, ShipperConfig};
