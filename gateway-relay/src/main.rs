//! gateway-relay: carries a stdio JSON-RPC peer over the bridge
//!
//! Stdout belongs to the peer; diagnostics go to the relay log file.

mod cli;
mod config;
mod fallback;
mod heartbeat;
mod lock;
mod peer;
mod relay;
mod sink;
mod state;
mod worker;

#[cfg(test)]
mod testing;

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};

use gateway_protocol::{JsonRpcError, JsonRpcResponse, RequestId};
use gateway_utils::{
    init_logging_with_config, GatewayError, LogConfig, LogShipper, LogSink, NullSink, Result,
    ShipperConfig,
};

use crate::cli::Args;
use crate::config::RelayConfig;
use crate::lock::InstanceLock;
use crate::relay::Relay;
use crate::sink::HttpLogSink;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = init_logging_with_config(LogConfig::relay()) {
        eprintln!("gateway-relay: logging disabled: {}", e);
    }

    let lock = match InstanceLock::acquire(&args.lock_path()) {
        Ok(lock) => lock,
        Err(e) => return fatal(e),
    };

    let config = RelayConfig::from_args(&args);
    let shipper = match build_shipper(&args, &config) {
        Ok(shipper) => Arc::new(shipper),
        Err(e) => return fatal(e),
    };
    shipper.start();

    let relay = match Relay::new(config, Arc::clone(&shipper)) {
        Ok(relay) => relay,
        Err(e) => return fatal(e),
    };
    if let Err(e) = relay.start_heartbeat() {
        error!(error = %e, "Heartbeat unavailable");
    }

    info!(
        pid = std::process::id(),
        lock = %lock.path().display(),
        bridge = %relay.config().socket_url(),
        "Relay started"
    );
    shipper.info("Relay started", Some(json!({"pid": std::process::id()})));

    let exit = relay
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await;

    shipper.info("Relay stopping", Some(json!({"exit": format!("{:?}", exit)})));
    relay.shutdown().await;
    shipper.stop().await;
    drop(lock);

    info!("Relay stopped");
    Ok(())
}

fn build_shipper(args: &Args, config: &RelayConfig) -> Result<LogShipper> {
    let sink: Arc<dyn LogSink> = if args.no_log_shipping {
        Arc::new(NullSink)
    } else {
        Arc::new(HttpLogSink::new(config)?)
    };
    LogShipper::new(
        format!("relay-{}", std::process::id()),
        ShipperConfig::default(),
        sink,
    )
}

/// Tell the peer why the relay cannot run, then exit with the error
fn fatal(err: GatewayError) -> Result<()> {
    error!(error = %err, "Relay cannot start");
    let response = fatal_response(&err);
    if let Ok(line) = response.to_line() {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", line);
        let _ = stdout.flush();
    }
    Err(err)
}

fn fatal_response(err: &GatewayError) -> JsonRpcResponse {
    let error = match err {
        GatewayError::AnotherInstance { pid } => JsonRpcError::with_data(
            JsonRpcError::SERVER_ERROR,
            "another instance running",
            json!({"pid": pid}),
        ),
        other => JsonRpcError::new(JsonRpcError::SERVER_ERROR, other.to_string()),
    };
    JsonRpcResponse::error(RequestId::empty(), error)
}
