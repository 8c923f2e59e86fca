use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use gateway_server::{default_registry, http, AppConfig, AppEntry, ServerState};

use super::*;
use crate::state::Handshake;
use crate::testing::{answer, answering_script, wait_until, Action, FakeBridge, Harness, Script};

fn initialize(id: &str) -> Value {
    json!({"jsonrpc": "2.0", "method": "initialize", "id": id})
}

fn call(id: &str, method: &str) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "id": id, "params": {"text": id}})
}

// ==================== Forwarding ====================

#[tokio::test]
async fn test_handshake_and_call() {
    let bridge = FakeBridge::start(answering_script()).await;
    let mut harness = Harness::start(bridge.config("key"));

    harness.send(initialize("1")).await;
    let notice = harness.recv().await;
    assert_eq!(notice["id"], "connection");
    assert_eq!(notice["result"]["type"], "connection_established");

    let reply = harness.recv().await;
    assert_eq!(reply["id"], "1");
    assert!(reply["result"]["tools"].is_object());

    harness.send(call("2", "minimal.echo")).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], "2");
    assert_eq!(reply["result"]["method"], "minimal.echo");

    assert_eq!(harness.finish().await, PeerExit::Eof);
    assert_eq!(bridge.connections(), 1);
}

#[tokio::test]
async fn test_numeric_ids_come_back_as_strings() {
    let bridge = FakeBridge::start(answering_script()).await;
    let mut harness = Harness::start(bridge.config("key"));

    harness.send(json!({"jsonrpc": "2.0", "method": "initialize", "id": 1})).await;
    let reply = harness.recv_reply().await;
    assert_eq!(reply["id"], "1");

    harness.finish().await;
}

#[tokio::test]
async fn test_repeated_reply_written_once() {
    let script: Script = Arc::new(|conn, request| {
        let reply = answer(conn, request);
        if request["method"] == "dup.op" {
            vec![Action::Reply(reply.clone()), Action::Reply(reply)]
        } else {
            vec![Action::Reply(reply)]
        }
    });
    let bridge = FakeBridge::start(script).await;
    let mut harness = Harness::start(bridge.config("key"));

    harness.send(initialize("1")).await;
    harness.recv_reply().await;
    harness.send(call("2", "dup.op")).await;
    assert_eq!(harness.recv_reply().await["id"], "2");

    harness.send(call("3", "minimal.echo")).await;
    assert_eq!(harness.recv_reply().await["id"], "3");

    harness.finish().await;
}

#[tokio::test]
async fn test_notification_forwarded_silently() {
    let bridge = FakeBridge::start(answering_script()).await;
    let mut harness = Harness::start(bridge.config("key"));

    harness.send(initialize("1")).await;
    harness.recv_reply().await;
    harness
        .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    harness.send(call("2", "minimal.echo")).await;
    assert_eq!(harness.recv_reply().await["id"], "2");
    harness.expect_silence(Duration::from_millis(100)).await;

    let notification = bridge
        .socket_messages()
        .into_iter()
        .map(|(_, m)| m)
        .find(|m| m["method"] == "notifications/initialized")
        .unwrap();
    assert!(notification["id"].as_str().unwrap().starts_with("relay-"));

    harness.finish().await;
}

#[tokio::test]
async fn test_duplicate_initialize_answered_locally() {
    let bridge = FakeBridge::start(answering_script()).await;
    let mut harness = Harness::start(bridge.config("key"));

    // Both arrive before the worker can reach the bridge
    harness.send(initialize("1")).await;
    harness.send(initialize("2")).await;
    let mut replies = vec![harness.recv_reply().await, harness.recv_reply().await];
    replies.sort_by_key(|r| r["id"].as_str().unwrap_or_default().to_string());

    assert_eq!(replies[0]["id"], "1");
    assert!(replies[0]["result"]["tools"].is_object());
    assert_eq!(replies[1]["id"], "2");
    assert_eq!(replies[1]["error"]["code"], -32002);
    assert_eq!(
        replies[1]["error"]["message"],
        "Server initialization in progress"
    );

    harness.send(initialize("3")).await;
    let cached = harness.recv_reply().await;
    assert_eq!(cached["id"], "3");
    assert_eq!(cached["result"], replies[0]["result"]);

    let handshakes = bridge
        .socket_messages()
        .iter()
        .filter(|(_, m)| m["method"] == "initialize")
        .count();
    assert_eq!(handshakes, 1);

    harness.finish().await;
}

#[tokio::test]
async fn test_single_worker() {
    let bridge = FakeBridge::start(answering_script()).await;
    let harness = Harness::start(bridge.config("key"));

    assert!(harness.relay.ensure_worker());
    assert!(!harness.relay.ensure_worker());
    assert!(harness.relay.state().worker().running);
}

#[tokio::test]
async fn test_shutdown_refuses_new_worker() {
    let bridge = FakeBridge::start(answering_script()).await;
    let harness = Harness::start(bridge.config("key"));

    harness.relay.shutdown().await;
    assert!(!harness.relay.ensure_worker());
}

// ==================== Reconnection ====================

#[tokio::test]
async fn test_reconnect_rehandshakes_and_resends() {
    let script: Script = Arc::new(|conn, request| {
        if conn == 1 && request["method"] == "slow.op" {
            vec![Action::Close(1011)]
        } else {
            vec![Action::Reply(answer(conn, request))]
        }
    });
    let bridge = FakeBridge::start(script).await;
    let mut harness = Harness::start(bridge.config("key"));

    harness.send(initialize("1")).await;
    assert_eq!(harness.recv().await["id"], "connection");
    assert_eq!(harness.recv().await["id"], "1");

    harness.send(call("2", "slow.op")).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], "2");
    assert_eq!(reply["result"]["connection"], 2);
    assert_eq!(bridge.connections(), 2);

    let second: Vec<Value> = bridge
        .socket_messages()
        .into_iter()
        .filter(|(conn, _)| *conn == 2)
        .map(|(_, m)| m)
        .collect();
    assert_eq!(second[0]["method"], "initialize");
    assert_eq!(second[0]["id"], "relay-init-2");
    assert_eq!(second[1]["id"], "2");

    let peer_handshakes = bridge
        .socket_messages()
        .iter()
        .filter(|(_, m)| m["id"] == "1")
        .count();
    assert_eq!(peer_handshakes, 1);

    // Notice of the second connection is not repeated
    harness.send(call("3", "minimal.echo")).await;
    assert_eq!(harness.recv().await["id"], "3");

    harness.finish().await;
}

#[tokio::test]
async fn test_fallback_rehandshakes_before_forwarding() {
    let script: Script = Arc::new(|conn, request| {
        if conn == 1 && request["method"] == "slow.op" {
            vec![Action::Close(1011)]
        } else {
            vec![Action::Reply(answer(conn, request))]
        }
    });
    let bridge = FakeBridge::start(script).await;
    let mut harness = Harness::start(bridge.config("key"));

    harness.send(initialize("1")).await;
    harness.recv_reply().await;

    bridge.refuse_socket(Some(503));
    harness.send(call("2", "slow.op")).await;
    let reply = harness.recv_reply().await;
    assert_eq!(reply["id"], "2");
    assert_eq!(reply["result"]["connection"], 0);

    let rpc = bridge.rpc_messages();
    assert_eq!(rpc[0]["method"], "initialize");
    assert!(rpc[0]["id"].as_str().unwrap().starts_with("relay-init-"));
    assert_eq!(rpc[1]["id"], "2");

    harness.finish().await;
}

// ==================== Authentication ====================

#[tokio::test]
async fn test_auth_close_fails_pending_and_later_requests() {
    let bridge = FakeBridge::start(answering_script()).await;
    bridge.close_on_connect(Some(4001));
    let mut harness = Harness::start(bridge.config("retired-key"));

    harness.send(initialize("1")).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], "1");
    assert_eq!(reply["error"]["code"], -32000);

    harness.send(call("2", "minimal.echo")).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], "2");
    assert_eq!(reply["error"]["message"], "authentication rejected");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(bridge.connections(), 1);

    harness.finish().await;
}

#[tokio::test]
async fn test_refused_upgrade_fails_requests() {
    let bridge = FakeBridge::start(answering_script()).await;
    bridge.refuse_socket(Some(401));
    let mut harness = Harness::start(bridge.config("bad-key"));

    harness.send(call("1", "minimal.echo")).await;
    let reply = harness.recv().await;
    assert_eq!(reply["error"]["code"], -32000);
    assert!(harness.relay.state().is_auth_rejected());
    assert_eq!(harness.relay.state().handshake(), Handshake::Idle);

    harness.finish().await;
}

// ==================== Heartbeat ====================

#[tokio::test]
async fn test_heartbeat_repeats() {
    let bridge = FakeBridge::start(answering_script()).await;
    let harness = Harness::start(bridge.config("key"));
    harness.relay.start_heartbeat().unwrap();

    assert!(wait_until(Duration::from_secs(2), || bridge.heartbeats() >= 3).await);
    harness.relay.shutdown().await;
}

#[tokio::test]
async fn test_rejected_heartbeat_fails_requests() {
    let bridge = FakeBridge::start(answering_script()).await;
    bridge.set_heartbeat_status(401);
    let mut harness = Harness::start(bridge.config("key"));
    harness.relay.start_heartbeat().unwrap();

    let state = Arc::clone(harness.relay.state());
    assert!(wait_until(Duration::from_secs(2), || state.is_auth_rejected()).await);
    let beats = bridge.heartbeats();

    harness.send(call("1", "minimal.echo")).await;
    assert_eq!(harness.recv().await["error"]["code"], -32000);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(bridge.heartbeats(), beats);
    assert_eq!(bridge.connections(), 0);

    harness.finish().await;
}

// ==================== Against the bridge server ====================

struct Server {
    addr: std::net::SocketAddr,
    _state: Arc<ServerState>,
    _dir: tempfile::TempDir,
}

async fn start_server() -> Server {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.log_shipper.fallback_dir = Some(dir.path().to_path_buf());
    config.log_shipper.stop_timeout_ms = 500;
    config.apps = vec![
        AppEntry {
            app_id: "desktop".into(),
            name: "Desktop".into(),
            api_key: "good-key".into(),
            active: true,
        },
        AppEntry {
            app_id: "retired".into(),
            name: "Retired".into(),
            api_key: "retired-key".into(),
            active: false,
        },
    ];

    let state = Arc::new(ServerState::new(config, Arc::new(default_registry())));
    let listener = http::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve(listener, Arc::clone(&state)));
    Server {
        addr,
        _state: state,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_end_to_end_with_server() {
    let server = start_server().await;
    let mut harness = Harness::start(crate::testing::fast_config(server.addr, "good-key"));

    harness.send(initialize("1")).await;
    assert_eq!(harness.recv().await["id"], "connection");
    let reply = harness.recv().await;
    assert_eq!(reply["id"], "1");
    assert!(reply["result"]["tools"]["minimal"].is_object());

    harness.send(call("2", "minimal.echo")).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], "2");
    assert_eq!(reply["result"], "2");

    harness
        .send(json!({"jsonrpc": "2.0", "method": "doesnotexist", "id": "3"}))
        .await;
    let reply = harness.recv().await;
    assert_eq!(reply["error"]["code"], -32601);

    assert_eq!(harness.finish().await, PeerExit::Eof);
}

#[tokio::test]
async fn test_inactive_app_rejected_by_server() {
    let server = start_server().await;
    let mut harness = Harness::start(crate::testing::fast_config(server.addr, "retired-key"));

    harness.send(initialize("1")).await;
    let reply = harness.recv().await;
    assert_eq!(reply["id"], "1");
    assert_eq!(reply["error"]["code"], -32000);
    assert!(harness.relay.state().is_auth_rejected());

    harness.finish().await;
}

#[tokio::test]
async fn test_unknown_key_rejected_by_server() {
    let server = start_server().await;
    let mut harness = Harness::start(crate::testing::fast_config(server.addr, "nope"));

    harness.send(initialize("1")).await;
    assert_eq!(harness.recv().await["error"]["code"], -32000);

    harness.finish().await;
}
