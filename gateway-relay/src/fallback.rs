//! HTTP fallback for requests the socket could not carry
//!
//! The server keeps one session per app and relay process behind
//! `POST /api/bridge/rpc`, so a handshake made here persists across calls
//! without colliding with another relay's.

use reqwest::StatusCode;
use tracing::debug;
use uuid::Uuid;

use gateway_protocol::{JsonRpcRequest, JsonRpcResponse, API_KEY_HEADER, RELAY_SESSION_HEADER};
use gateway_utils::{GatewayError, Result};

use crate::config::RelayConfig;

/// Client for the server's JSON-RPC fallback endpoint
pub struct HttpFallback {
    client: reqwest::Client,
    url: String,
    api_key: String,
    session_id: String,
}

impl HttpFallback {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| GatewayError::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.http_url("/api/bridge/rpc"),
            api_key: config.api_key.clone(),
            session_id: format!("relay-{}-{}", std::process::id(), Uuid::new_v4()),
        })
    }

    /// Send one request; `None` means the server accepted it without a reply
    pub async fn send(&self, request: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>> {
        let response = self
            .client
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(RELAY_SESSION_HEADER, &self.session_id)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::connection(format!("fallback request failed: {}", e)))?;

        let status = response.status();
        debug!(method = %request.method, status = %status, "Fallback request answered");
        match status {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::auth_rejected(
                format!("fallback refused with HTTP {}", status),
            )),
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| GatewayError::connection(e.to_string()))?;
                let reply = JsonRpcResponse::parse(&body)
                    .map_err(|e| GatewayError::protocol(format!("bad fallback reply: {}", e)))?;
                Ok(Some(reply))
            }
            status => Err(GatewayError::connection(format!(
                "fallback returned HTTP {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{answering_script, FakeBridge};

    fn initialize(id: &str) -> JsonRpcRequest {
        JsonRpcRequest::new(id, "initialize")
    }

    #[tokio::test]
    async fn test_each_relay_names_its_own_session() {
        let bridge = FakeBridge::start(answering_script()).await;
        let first = HttpFallback::new(&bridge.config("key")).unwrap();
        let second = HttpFallback::new(&bridge.config("key")).unwrap();

        first.send(&initialize("1")).await.unwrap();
        first.send(&initialize("2")).await.unwrap();
        second.send(&initialize("3")).await.unwrap();

        let sessions = bridge.rpc_sessions();
        assert_eq!(sessions.len(), 3);
        let first_id = sessions[0].clone().expect("session header missing");
        assert!(first_id.starts_with(&format!("relay-{}-", std::process::id())));
        assert_eq!(sessions[1].as_deref(), Some(first_id.as_str()));
        assert!(sessions[2].is_some());
        assert_ne!(sessions[2].as_deref(), Some(first_id.as_str()));
    }
}
