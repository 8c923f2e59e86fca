//! Periodic liveness report to the bridge server

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use gateway_protocol::API_KEY_HEADER;
use gateway_utils::{GatewayError, LogShipper, Result};

use crate::config::RelayConfig;
use crate::state::RelayState;

/// POSTs `/api/bridge/heartbeat` on an interval
pub struct Heartbeat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    interval: std::time::Duration,
}

impl Heartbeat {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.http_url("/api/bridge/heartbeat"),
            api_key: config.api_key.clone(),
            interval: config.heartbeat_interval,
        })
    }

    /// Send a single heartbeat
    pub async fn beat(&self) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({"status": "alive"}))
            .send()
            .await
            .map_err(|e| GatewayError::connection(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::auth_rejected(
                format!("heartbeat refused with HTTP {}", response.status()),
            )),
            status => Err(GatewayError::connection(format!("HTTP {}", status))),
        }
    }

    /// Beat until shutdown or until the server refuses the credential
    pub async fn run(
        self,
        state: Arc<RelayState>,
        shipper: Arc<LogShipper>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.changed() => break,
            }
            if state.is_auth_rejected() {
                break;
            }

            match self.beat().await {
                Ok(()) => debug!("Heartbeat sent"),
                Err(e) if e.is_auth_failure() => {
                    warn!(error = %e, "Heartbeat rejected; stopping relay");
                    shipper.error("Heartbeat rejected", Some(json!({"error": e.to_string()})));
                    state.reject_auth();
                    break;
                }
                Err(e) => debug!(error = %e, "Heartbeat failed"),
            }
        }
        info!("Heartbeat task exiting");
    }
}
