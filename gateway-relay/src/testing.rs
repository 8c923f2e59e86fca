//! Test support: a scripted bridge server and relay harness

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use gateway_protocol::{ConnectionNotice, HandshakeResult, RELAY_SESSION_HEADER};
use gateway_utils::{LogShipper, NullSink, ShipperConfig};

use crate::config::RelayConfig;
use crate::peer::PeerExit;
use crate::relay::Relay;

/// What the fake bridge does in answer to a message
pub enum Action {
    Reply(Value),
    Close(u16),
}

/// Script run for every message; gets the 1-based connection number (0 for
/// the HTTP fallback) and the received request
pub type Script = Arc<dyn Fn(usize, &Value) -> Vec<Action> + Send + Sync>;

/// Answers `initialize` with a handshake result and everything else with
/// `{"method": .., "connection": ..}`
pub fn answering_script() -> Script {
    Arc::new(|conn, request| vec![Action::Reply(answer(conn, request))])
}

/// The reply `answering_script` gives
pub fn answer(conn: usize, request: &Value) -> Value {
    let id = request["id"].clone();
    if request["method"] == "initialize" {
        let result = serde_json::to_value(HandshakeResult::new(Default::default())).unwrap();
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    } else {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"method": request["method"], "connection": conn}
        })
    }
}

struct Inner {
    script: Script,
    /// `Some(status)` refuses upgrades with that status
    refuse_socket: Mutex<Option<u16>>,
    /// `Some(code)` closes every new connection right after the upgrade
    close_on_connect: Mutex<Option<u16>>,
    heartbeat_status: AtomicU16,
    connections: AtomicUsize,
    heartbeats: AtomicUsize,
    socket_messages: Mutex<Vec<(usize, Value)>>,
    rpc_messages: Mutex<Vec<Value>>,
    /// Relay session header of each fallback request
    rpc_sessions: Mutex<Vec<Option<String>>>,
    log_batches: Mutex<Vec<Value>>,
}

/// Loopback bridge server driven by a [`Script`]
pub struct FakeBridge {
    pub addr: SocketAddr,
    inner: Arc<Inner>,
    task: JoinHandle<()>,
}

impl FakeBridge {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let inner = Arc::new(Inner {
            script,
            refuse_socket: Mutex::new(None),
            close_on_connect: Mutex::new(None),
            heartbeat_status: AtomicU16::new(200),
            connections: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            socket_messages: Mutex::new(Vec::new()),
            rpc_messages: Mutex::new(Vec::new()),
            rpc_sessions: Mutex::new(Vec::new()),
            log_batches: Mutex::new(Vec::new()),
        });

        let accept_inner = Arc::clone(&inner);
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    continue;
                };
                let inner = Arc::clone(&accept_inner);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let inner = Arc::clone(&inner);
                        async move { Ok::<_, Infallible>(handle(req, inner).await) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .with_upgrades()
                        .await;
                });
            }
        });

        Self { addr, inner, task }
    }

    /// Relay configuration pointing here, with test timings
    pub fn config(&self, api_key: &str) -> RelayConfig {
        fast_config(self.addr, api_key)
    }

    pub fn refuse_socket(&self, status: Option<u16>) {
        *self.inner.refuse_socket.lock() = status;
    }

    pub fn close_on_connect(&self, code: Option<u16>) {
        *self.inner.close_on_connect.lock() = code;
    }

    pub fn set_heartbeat_status(&self, status: u16) {
        self.inner.heartbeat_status.store(status, Ordering::SeqCst);
    }

    /// WebSocket connections accepted so far
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.inner.heartbeats.load(Ordering::SeqCst)
    }

    pub fn socket_messages(&self) -> Vec<(usize, Value)> {
        self.inner.socket_messages.lock().clone()
    }

    pub fn rpc_messages(&self) -> Vec<Value> {
        self.inner.rpc_messages.lock().clone()
    }

    pub fn rpc_sessions(&self) -> Vec<Option<String>> {
        self.inner.rpc_sessions.lock().clone()
    }

    pub fn log_batches(&self) -> Vec<Value> {
        self.inner.log_batches.lock().clone()
    }
}

impl Drop for FakeBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(mut req: Request<Incoming>, inner: Arc<Inner>) -> Response<Full<Bytes>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::GET, "/api/bridge/connect") => {
            if let Some(status) = *inner.refuse_socket.lock() {
                return status_response(status, Value::Null);
            }
            let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
                return status_response(400, Value::Null);
            };
            let accept = HeaderValue::from_str(&derive_accept_key(key.as_bytes())).unwrap();
            let on_upgrade = hyper::upgrade::on(&mut req);
            tokio::spawn(async move {
                if let Ok(upgraded) = on_upgrade.await {
                    let ws =
                        WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                            .await;
                    run_socket(ws, inner).await;
                }
            });

            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
            let headers = response.headers_mut();
            headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
            headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
            headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
            response
        }
        (&Method::POST, "/api/bridge/rpc") => {
            let session = req
                .headers()
                .get(RELAY_SESSION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            inner.rpc_sessions.lock().push(session);
            let body = read_json(req).await;
            inner.rpc_messages.lock().push(body.clone());
            let reply = (inner.script)(0, &body).into_iter().find_map(|action| match action {
                Action::Reply(value) => Some(value),
                Action::Close(_) => None,
            });
            match reply {
                Some(value) => status_response(200, value),
                None => status_response(204, Value::Null),
            }
        }
        (&Method::POST, "/api/bridge/heartbeat") => {
            inner.heartbeats.fetch_add(1, Ordering::SeqCst);
            let status = inner.heartbeat_status.load(Ordering::SeqCst);
            status_response(status, json!({"status": "ok"}))
        }
        (&Method::POST, "/api/bridge/logs") => {
            let body = read_json(req).await;
            inner.log_batches.lock().push(body);
            status_response(200, json!([]))
        }
        _ => status_response(404, Value::Null),
    }
}

async fn run_socket<S>(mut ws: WebSocketStream<S>, inner: Arc<Inner>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let conn = inner.connections.fetch_add(1, Ordering::SeqCst) + 1;

    let close_code = *inner.close_on_connect.lock();
    if let Some(code) = close_code {
        close(&mut ws, code).await;
        return;
    }

    let notice = ConnectionNotice::established(format!("fake-{}", conn)).into_response();
    let text = notice.to_line().unwrap();
    if ws.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        inner.socket_messages.lock().push((conn, request.clone()));

        for action in (inner.script)(conn, &request) {
            match action {
                Action::Reply(value) => {
                    if ws.send(Message::Text(value.to_string().into())).await.is_err() {
                        return;
                    }
                }
                Action::Close(code) => {
                    close(&mut ws, code).await;
                    return;
                }
            }
        }
    }
}

async fn close<S>(ws: &mut WebSocketStream<S>, code: u16)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: "scripted close".to_string().into(),
    };
    let _ = ws.close(Some(frame)).await;
    let _ = tokio::time::timeout(Duration::from_millis(500), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

async fn read_json(req: Request<Incoming>) -> Value {
    let bytes = req.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn status_response(status: u16, body: Value) -> Response<Full<Bytes>> {
    let body = if body.is_null() {
        Bytes::new()
    } else {
        Bytes::from(body.to_string())
    };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap();
    response
}

/// Test timings against a given address
pub fn fast_config(addr: SocketAddr, api_key: &str) -> RelayConfig {
    let mut config = RelayConfig::new(api_key, addr.ip().to_string(), addr.port());
    config.poll_interval = Duration::from_millis(5);
    config.recv_timeout = Duration::from_millis(10);
    config.write_retry_pause = Duration::from_millis(5);
    config.eof_grace = Duration::from_secs(2);
    config.reconnect_backoff = Duration::from_millis(50);
    config.connect_attempts = 2;
    config.connect_retry_pause = Duration::from_millis(10);
    config.heartbeat_interval = Duration::from_millis(50);
    config.http_timeout = Duration::from_secs(2);
    config
}

/// An address nothing listens on
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Shipper writing its fallback file into `dir` and shipping nowhere
pub fn test_shipper(dir: &TempDir) -> Arc<LogShipper> {
    let config = ShipperConfig {
        fallback_dir: Some(dir.path().to_path_buf()),
        stop_timeout_ms: 500,
        ..Default::default()
    };
    Arc::new(LogShipper::new("relay-test", config, Arc::new(NullSink)).unwrap())
}

/// Poll `check` until it holds or `timeout` passes
pub async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A relay serving an in-memory peer
pub struct Harness {
    pub relay: Arc<Relay>,
    input: Option<WriteHalf<DuplexStream>>,
    output: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    task: Option<JoinHandle<PeerExit>>,
    _dir: TempDir,
}

impl Harness {
    pub fn start(config: RelayConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let relay = Arc::new(Relay::new(config, test_shipper(&dir)).unwrap());

        let (peer, relay_side) = tokio::io::duplex(256 * 1024);
        let (relay_read, relay_write) = tokio::io::split(relay_side);
        let (peer_read, peer_write) = tokio::io::split(peer);

        let serving = Arc::clone(&relay);
        let task = tokio::spawn(async move { serving.serve(relay_read, relay_write).await });

        Self {
            relay,
            input: Some(peer_write),
            output: BufReader::new(peer_read).lines(),
            task: Some(task),
            _dir: dir,
        }
    }

    /// Write one raw line to the relay
    pub async fn send_raw(&mut self, line: &str) {
        let input = self.input.as_mut().expect("input already closed");
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"\n").await.unwrap();
        input.flush().await.unwrap();
    }

    pub async fn send(&mut self, message: Value) {
        self.send_raw(&message.to_string()).await;
    }

    /// Next line the relay wrote, within five seconds
    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.output.next_line())
            .await
            .expect("timed out waiting for relay output")
            .unwrap()
            .expect("relay output closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Next reply that is not the connection notice
    pub async fn recv_reply(&mut self) -> Value {
        loop {
            let message = self.recv().await;
            if message["id"] != "connection" {
                return message;
            }
        }
    }

    /// Assert nothing is written for `duration`
    pub async fn expect_silence(&mut self, duration: Duration) {
        if let Ok(line) = tokio::time::timeout(duration, self.output.next_line()).await {
            panic!("unexpected relay output: {:?}", line);
        }
    }

    /// Close the relay's input and wait for the peer loop to finish
    pub async fn finish(&mut self) -> PeerExit {
        if let Some(mut input) = self.input.take() {
            // Dropping one half of a split stream does not close it
            input.shutdown().await.unwrap();
        }
        let task = self.task.take().expect("already finished");
        let exit = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("peer loop did not finish")
            .unwrap();
        self.relay.shutdown().await;
        exit
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
