//! Socket worker
//!
//! Owns the WebSocket connection to the bridge. Requests come from the
//! pending table and replies go to the outbound queue; the worker never
//! touches stdio.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use gateway_protocol::{
    ConnectionNotice, JsonRpcError, JsonRpcRequest, JsonRpcResponse, API_KEY_HEADER,
    AUTH_FAILURE_CLOSE_CODE, INITIALIZE_METHOD,
};
use gateway_utils::{GatewayError, LogShipper, Result};

use crate::config::RelayConfig;
use crate::fallback::HttpFallback;
use crate::state::{Delivery, RelayState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outcome of one connect window
enum Connect {
    Connected(Box<Socket>),
    Exhausted,
    AuthRejected(String),
    Shutdown,
}

/// Why a live connection ended
#[derive(Debug)]
enum Disconnect {
    Closed(String),
    AuthRejected(String),
    Shutdown,
}

/// Background connection loop
pub struct Worker {
    config: Arc<RelayConfig>,
    state: Arc<RelayState>,
    shipper: Arc<LogShipper>,
    fallback: Arc<HttpFallback>,
    shutdown_rx: watch::Receiver<bool>,
    /// Whether the server's fallback session has seen a handshake
    fallback_initialized: bool,
}

impl Worker {
    pub fn new(
        config: Arc<RelayConfig>,
        state: Arc<RelayState>,
        shipper: Arc<LogShipper>,
        fallback: Arc<HttpFallback>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            state,
            shipper,
            fallback,
            shutdown_rx,
            fallback_initialized: false,
        }
    }

    /// Run until shutdown or until the credential is refused
    ///
    /// The caller must have claimed the worker slot; it is released here.
    pub async fn run(mut self) {
        info!("Socket worker started");

        loop {
            if self.stopping() {
                break;
            }

            match self.connect_window().await {
                Connect::Connected(socket) => match self.drive(*socket).await {
                    Disconnect::Shutdown => break,
                    Disconnect::AuthRejected(reason) => {
                        self.reject(&reason);
                        break;
                    }
                    Disconnect::Closed(reason) => {
                        warn!(reason = %reason, "Bridge connection lost");
                        self.shipper
                            .warning("Bridge connection lost", Some(json!({"reason": reason})));
                    }
                },
                Connect::AuthRejected(reason) => {
                    self.reject(&reason);
                    break;
                }
                Connect::Shutdown => break,
                Connect::Exhausted => {
                    if self.state.has_pending() {
                        if let Err(e) = self.run_fallback().await {
                            if e.is_auth_failure() {
                                self.reject(&e.to_string());
                                break;
                            }
                            debug!(error = %e, "Fallback unavailable");
                        }
                    }
                }
            }

            if !self.pause(self.config.reconnect_backoff).await {
                break;
            }
        }

        self.state.release_worker();
        info!("Socket worker stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown_rx.borrow() || self.state.is_auth_rejected()
    }

    /// Sleep unless shutdown arrives first; false means stop
    async fn pause(&mut self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.stopping(),
            _ = self.shutdown_rx.changed() => false,
        }
    }

    fn reject(&self, reason: &str) {
        warn!(reason = %reason, "Bridge refused the credential; not reconnecting");
        self.shipper
            .error("Authentication rejected", Some(json!({"reason": reason})));
        let answered = self.state.reject_auth();
        debug!(answered, "Failed pending requests after authentication rejection");
    }

    // ==================== Connecting ====================

    async fn connect_window(&mut self) -> Connect {
        let attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=attempts {
            if self.stopping() {
                return Connect::Shutdown;
            }

            match self.connect_once().await {
                Ok(socket) => return Connect::Connected(Box::new(socket)),
                Err(e) if e.is_auth_failure() => return Connect::AuthRejected(e.to_string()),
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Connect attempt failed");
                    if attempt < attempts && !self.pause(self.config.connect_retry_pause).await {
                        return Connect::Shutdown;
                    }
                }
            }
        }
        Connect::Exhausted
    }

    async fn connect_once(&self) -> Result<Socket> {
        let mut request = self
            .config
            .socket_url()
            .into_client_request()
            .map_err(|e| GatewayError::config(format!("bad bridge URL: {}", e)))?;
        let key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|e| GatewayError::config(format!("API key is not a valid header: {}", e)))?;
        request.headers_mut().insert(API_KEY_HEADER, key);

        match connect_async(request).await {
            Ok((socket, _)) => Ok(socket),
            Err(WsError::Http(response))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                Err(GatewayError::auth_rejected(format!(
                    "HTTP {}",
                    response.status().as_u16()
                )))
            }
            Err(e) => Err(GatewayError::connection(e.to_string())),
        }
    }

    // ==================== Connected ====================

    async fn drive(&mut self, mut socket: Socket) -> Disconnect {
        let epoch = self.state.begin_connection();
        info!(epoch, "Connected to bridge");
        self.shipper
            .info("Bridge connected", Some(json!({"epoch": epoch})));

        let end = self.exchange(&mut socket, epoch).await;
        self.state.end_connection();
        end
    }

    async fn exchange(&mut self, socket: &mut Socket, epoch: u64) -> Disconnect {
        // The handshake always goes first on a new connection
        let mut internal_init = None;
        let first = match self.state.take_initialize(epoch) {
            Some(request) => Some(request),
            None if self.state.handshake_acknowledged() => {
                let id = format!("relay-init-{}", epoch);
                internal_init = Some(id.clone());
                Some(JsonRpcRequest::new(id, INITIALIZE_METHOD))
            }
            None => None,
        };
        if let Some(request) = first {
            if let Err(e) = send_request(socket, &request).await {
                return Disconnect::Closed(e.to_string());
            }
        }

        loop {
            let received = tokio::select! {
                received = tokio::time::timeout(self.config.recv_timeout, socket.next()) => received,
                _ = self.shutdown_rx.changed() => {
                    let _ = socket.close(None).await;
                    return Disconnect::Shutdown;
                }
            };

            match received {
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.on_text(text.as_str(), &mut internal_init);
                }
                Ok(Some(Ok(Message::Binary(bytes)))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.on_text(text, &mut internal_init),
                    Err(_) => warn!("Dropped non-UTF-8 binary message"),
                },
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    if let Err(e) = socket.send(Message::Pong(payload)).await {
                        return Disconnect::Closed(e.to_string());
                    }
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    return match frame {
                        Some(frame) if u16::from(frame.code) == AUTH_FAILURE_CLOSE_CODE => {
                            Disconnect::AuthRejected(format!(
                                "closed with code {}: {}",
                                AUTH_FAILURE_CLOSE_CODE,
                                frame.reason.as_str()
                            ))
                        }
                        Some(frame) => Disconnect::Closed(format!(
                            "closed with code {}: {}",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        )),
                        None => Disconnect::Closed("closed without a code".into()),
                    };
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => return Disconnect::Closed(e.to_string()),
                Ok(None) => return Disconnect::Closed("stream ended".into()),
                Err(_) => {
                    if self.state.is_auth_rejected() {
                        let _ = socket.close(None).await;
                        return Disconnect::AuthRejected("rejected elsewhere".into());
                    }
                    if let Some(request) = self.state.next_unsent(epoch) {
                        debug!(method = %request.method, id = ?request.id, epoch, "Forwarding request");
                        if let Err(e) = send_request(socket, &request).await {
                            return Disconnect::Closed(e.to_string());
                        }
                    }
                }
            }
        }
    }

    fn on_text(&self, text: &str, internal_init: &mut Option<String>) {
        let response = match JsonRpcResponse::parse(text) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Dropped unparseable message from bridge");
                return;
            }
        };

        if let Some(notice) = ConnectionNotice::from_response(&response) {
            info!(connection_id = %notice.connection_id, "Bridge session established");
            if self.state.on_connection_notice(response) {
                debug!("Connection notice queued for the peer");
            }
            return;
        }

        if internal_init.as_deref() == Some(response.id.as_str()) {
            debug!(id = %response.id, error = ?response.error, "Re-handshake answered");
            *internal_init = None;
            return;
        }

        let id = response.id.clone();
        match self.state.on_response(response) {
            Delivery::Enqueued => debug!(id = %id, "Reply queued for the peer"),
            Delivery::Consumed => debug!(id = %id, "Consumed reply to relay request"),
            Delivery::Duplicate => debug!(id = %id, "Dropped duplicate reply"),
        }
    }

    // ==================== HTTP fallback ====================

    /// Carry pending requests over HTTP while the socket is unavailable
    async fn run_fallback(&mut self) -> Result<()> {
        let mut requests = self.state.pending_requests();
        // Handshake first, otherwise oldest first
        requests.sort_by_key(|r| r.method != INITIALIZE_METHOD);
        info!(pending = requests.len(), "Socket unavailable; using HTTP fallback");

        if !self.fallback_initialized && self.state.handshake_acknowledged() {
            let id = format!("relay-init-{}", self.state.worker().epoch);
            let reply = self
                .fallback
                .send(&JsonRpcRequest::new(id, INITIALIZE_METHOD))
                .await?;
            self.fallback_initialized = reply.is_some_and(|r| {
                r.error.is_none() || r.error_code() == Some(JsonRpcError::INIT_STATE)
            });
        }

        for request in requests {
            if self.stopping() {
                break;
            }
            let id = request.id.clone().unwrap_or_default();
            match self.fallback.send(&request).await? {
                Some(reply) => {
                    if request.method == INITIALIZE_METHOD && reply.error.is_none() {
                        self.fallback_initialized = true;
                    }
                    self.state.on_response(reply);
                }
                None => {
                    self.state.abandon(id.as_str());
                }
            }
        }
        Ok(())
    }
}

async fn send_request(socket: &mut Socket, request: &JsonRpcRequest) -> Result<()> {
    let text = serde_json::to_string(request)?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| GatewayError::connection(e.to_string()))
}
