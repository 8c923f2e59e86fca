//! mcp-gateway bridge server binary

use std::sync::Arc;

use tracing::{error, info};

use gateway_server::cli::Args;
use gateway_server::{default_registry, http, ConfigLoader, ServerState};
use gateway_utils::{init_logging_with_config, LogConfig, LogOutput, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    let mut log_config = LogConfig::server();
    if args.verbose {
        log_config.output = LogOutput::Both;
    }
    init_logging_with_config(log_config)?;

    let config = ConfigLoader::load_and_validate(args.config.as_deref())?;
    info!(
        bind = %config.server.bind,
        apps = config.apps.len(),
        "Starting bridge server"
    );

    let state = Arc::new(ServerState::new(config, Arc::new(default_registry())));
    let listener = http::bind(&state.config.server.bind).await?;
    let server = tokio::spawn(http::serve(listener, Arc::clone(&state)));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");
    let _ = state.shutdown_tx.send(());

    if let Err(e) = server.await {
        error!("Server task failed: {}", e);
    }

    info!("Bridge server stopped");
    Ok(())
}
