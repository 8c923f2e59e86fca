//! HTTP surface of the bridge server
//!
//! One listener serves the health check, the WebSocket bridge endpoint, the
//! heartbeat and log APIs, and the HTTP fallback for JSON-RPC messages.

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    HeaderValue, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use gateway_protocol::{
    LogBatch, LogLevel, LogQuery, API_KEY_HEADER, DEFAULT_QUERY_LIMIT, RELAY_SESSION_HEADER,
};
use gateway_utils::{GatewayError, Result};

use crate::auth::{AppIdentity, AuthOutcome};
use crate::bridge::{close_with, reject_with_auth_failure, run_session};
use crate::state::ServerState;

type HttpResponse = Response<Full<Bytes>>;

const LOGS_PREFIX: &str = "/api/bridge/logs/";

/// Bind the server's listener
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| GatewayError::connection(format!("failed to bind {}: {}", addr, e)))
}

/// Serve connections until shutdown is broadcast
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) {
    match listener.local_addr() {
        Ok(addr) => info!("Bridge server listening on http://{}", addr),
        Err(e) => warn!("Bridge server listening on unknown address: {}", e),
    }

    let mut shutdown_rx = state.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, remote_addr) = match accept_result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Accept error: {}", e);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let state_clone = Arc::clone(&state);

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state_clone);
                        async move { handle_request(req, state).await }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        // Connection errors are expected when clients disconnect
                        if !e.is_incomplete_message() {
                            warn!("Connection error from {}: {}", remote_addr, e);
                        }
                    }
                });
            }

            _ = shutdown_rx.recv() => {
                info!("Bridge server shutting down");
                break;
            }
        }
    }

    state.close_rpc_sessions().await;
}

/// Handle an HTTP request
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
) -> std::result::Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, "HTTP request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => serve_health(&state),
        (&Method::GET, "/api/bridge/connect") => upgrade_bridge(req, state),
        (&Method::POST, "/api/bridge/heartbeat") => heartbeat(&req, &state),
        (&Method::POST, "/api/bridge/logs") => create_logs(req, &state).await,
        (&Method::POST, "/api/bridge/rpc") => rpc(req, &state).await,
        (&Method::GET, p) if p.starts_with(LOGS_PREFIX) => {
            query_logs(&req, &state, &p[LOGS_PREFIX.len()..])
        }
        _ => json_error(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

fn serve_health(state: &ServerState) -> HttpResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    json_response(
        StatusCode::OK,
        &json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at.to_rfc3339(),
            "uptime_seconds": uptime,
        }),
    )
}

// ==================== WebSocket bridge ====================

fn upgrade_bridge(mut req: Request<Incoming>, state: Arc<ServerState>) -> HttpResponse {
    let admitted = match state.apps.authenticate(api_key(&req)) {
        AuthOutcome::Rejected => {
            warn!("Rejected bridge connection with invalid API key");
            return json_error(StatusCode::FORBIDDEN, "Invalid API key");
        }
        AuthOutcome::Accepted(identity) => Ok(identity),
        AuthOutcome::Inactive(identity) => Err(identity),
    };

    if !is_websocket_upgrade(&req) {
        return json_error(StatusCode::BAD_REQUEST, "Expected WebSocket upgrade");
    }
    let Some(accept_key) = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()))
    else {
        return json_error(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key");
    };
    let Ok(accept_value) = HeaderValue::from_str(&accept_key) else {
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid accept key");
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("WebSocket upgrade failed: {}", e);
                return;
            }
        };
        let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

        match admitted {
            Ok(identity) => accept_bridge(ws, identity, state).await,
            Err(identity) => {
                info!(app_id = %identity.app_id, "Closing bridge connection of inactive app");
                reject_with_auth_failure(ws, "Application is inactive").await;
            }
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept_value);
    response
}

async fn accept_bridge<S>(ws: WebSocketStream<S>, identity: AppIdentity, state: Arc<ServerState>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    state.apps.touch(&identity.app_id);
    match state.open_session(identity) {
        Ok(session) => run_session(ws, session, state.shutdown_tx.subscribe()).await,
        Err(e) => {
            error!("Failed to open bridge session: {}", e);
            close_with(ws, CloseCode::Error, "Session unavailable").await;
        }
    }
}

fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

// ==================== REST endpoints ====================

fn heartbeat(req: &Request<Incoming>, state: &ServerState) -> HttpResponse {
    let Some(identity) = state.apps.active_identity(api_key(req)) else {
        return json_error(StatusCode::UNAUTHORIZED, "Invalid API key");
    };

    let timestamp = state.apps.touch(&identity.app_id);
    json_response(
        StatusCode::OK,
        &json!({"status": "ok", "timestamp": timestamp.to_rfc3339()}),
    )
}

async fn create_logs(req: Request<Incoming>, state: &ServerState) -> HttpResponse {
    let Some(identity) = state.apps.active_identity(api_key(&req)) else {
        return json_error(StatusCode::UNAUTHORIZED, "Invalid API key");
    };

    let value = match read_json(req, state.config.server.max_body_bytes).await {
        Ok(value) => value,
        Err(response) => return response,
    };
    let batch: LogBatch = match serde_json::from_value(value) {
        Ok(batch) => batch,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, &format!("Invalid log batch: {}", e))
        }
    };

    let created = state.logs.insert_batch(&identity.app_id, batch.logs);
    debug!(app_id = %identity.app_id, records = created.len(), "Stored log batch");
    json_response(StatusCode::OK, &created)
}

fn query_logs(req: &Request<Incoming>, state: &ServerState, app_id: &str) -> HttpResponse {
    let Some(identity) = state.apps.active_identity(api_key(req)) else {
        return json_error(StatusCode::UNAUTHORIZED, "Invalid API key");
    };
    if identity.app_id != app_id {
        return json_error(StatusCode::FORBIDDEN, "Not allowed to read this app's logs");
    }

    let query = match parse_log_query(req.uri().query().unwrap_or("")) {
        Ok(query) => query,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, &message),
    };

    json_response(StatusCode::OK, &state.logs.query(app_id, &query))
}

async fn rpc(req: Request<Incoming>, state: &ServerState) -> HttpResponse {
    let Some(identity) = state.apps.active_identity(api_key(&req)) else {
        return json_error(StatusCode::UNAUTHORIZED, "Invalid API key");
    };

    let relay_session = req
        .headers()
        .get(RELAY_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let value = match read_json(req, state.config.server.max_body_bytes).await {
        Ok(value) => value,
        Err(response) => return response,
    };

    let session = match state.rpc_session(&identity, relay_session.as_deref()).await {
        Ok(session) => session,
        Err(e) => {
            error!(app_id = %identity.app_id, "Failed to open fallback session: {}", e);
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Session unavailable");
        }
    };

    let reply = session.lock().await.on_value(value).await;
    match reply {
        Some(response) => json_response(StatusCode::OK, &response),
        None => empty_response(StatusCode::NO_CONTENT),
    }
}

/// Parse `level`, `connection_id`, `start_time`, `end_time`, `skip`, `limit`
fn parse_log_query(raw: &str) -> std::result::Result<LogQuery, String> {
    let mut query = LogQuery::default();

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        match key.as_ref() {
            "level" => {
                query.level = Some(
                    LogLevel::from_str(&value).map_err(|e| format!("Invalid level: {}", e))?,
                )
            }
            "connection_id" => query.connection_id = Some(value.into_owned()),
            "start_time" => query.start_time = Some(parse_time("start_time", &value)?),
            "end_time" => query.end_time = Some(parse_time("end_time", &value)?),
            "skip" => {
                query.skip = value
                    .parse()
                    .map_err(|_| format!("Invalid skip: {}", value))?
            }
            "limit" => {
                query.limit = value
                    .parse()
                    .map_err(|_| format!("Invalid limit: {}", value))?
            }
            _ => {}
        }
    }

    if query.limit == 0 {
        query.limit = DEFAULT_QUERY_LIMIT;
    }
    Ok(query)
}

fn parse_time(field: &str, value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("Invalid {}: {}", field, e))
}

// ==================== Helpers ====================

fn api_key<B>(req: &Request<B>) -> Option<&str> {
    req.headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
}

async fn read_json(req: Request<Incoming>, limit: usize) -> std::result::Result<Value, HttpResponse> {
    let bytes = match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(json_error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"));
        }
        Err(e) => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                &format!("Failed to read body: {}", e),
            ))
        }
    };

    serde_json::from_slice(&bytes)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, &format!("Invalid JSON body: {}", e)))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(bytes) => with_body(status, Bytes::from(bytes)),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            with_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(br#"{"detail":"Internal Server Error"}"#),
            )
        }
    }
}

fn json_error(status: StatusCode, detail: &str) -> HttpResponse {
    json_response(status, &json!({ "detail": detail }))
}

fn with_body(status: StatusCode, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn empty_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
