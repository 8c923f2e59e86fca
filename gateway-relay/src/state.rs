//! Tables shared by the peer loop and the socket worker
//!
//! Everything the two sides exchange lives behind one lock: the pending
//! request table, the outbound response queue, the dedup sets, the cached
//! handshake and the worker slot. Neither side performs I/O while holding it.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gateway_protocol::{
    fingerprint_response, fingerprint_value, lifecycle_fingerprint, Fingerprint, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, RequestId, CONNECTION_ESTABLISHED, INITIALIZE_METHOD,
};

/// Message answered locally when the credential was refused
pub const AUTH_REJECTED_MESSAGE: &str = "authentication rejected";

/// Message for a second `initialize` while the first is unanswered
pub const INIT_IN_PROGRESS_MESSAGE: &str = "Server initialization in progress";

/// A request waiting for its remote reply
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: JsonRpcRequest,
    /// Relay-generated id; the reply is consumed instead of forwarded
    pub silent: bool,
    /// Connection epoch the request was last sent on
    pub sent_epoch: Option<u64>,
}

/// Progress of the peer's own handshake
#[derive(Debug, Clone, PartialEq)]
pub enum Handshake {
    Idle,
    /// The peer's `initialize` is in the pending table under this id
    Pending(String),
    /// The remote acknowledged it with this result
    Acknowledged(Value),
}

/// What happened to a request read from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Added to the pending table; the worker should forward it
    Forward(RequestId),
    /// Answered locally without forwarding
    Answered,
}

/// What happened to a reply received from the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Enqueued,
    /// Reply to a relay-generated request
    Consumed,
    /// Already enqueued or delivered under the same fingerprint
    Duplicate,
}

/// Socket worker bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSlot {
    pub running: bool,
    pub connected: bool,
    pub auth_rejected: bool,
    /// Incremented on every established connection
    pub epoch: u64,
}

#[derive(Debug)]
struct Tables {
    pending: HashMap<String, PendingRequest>,
    /// Pending ids, oldest first
    order: VecDeque<String>,
    outbound: VecDeque<(Fingerprint, JsonRpcResponse)>,
    enqueued: HashSet<Fingerprint>,
    delivered: HashSet<Fingerprint>,
    lifecycle: HashSet<Fingerprint>,
    handshake: Handshake,
    worker: WorkerSlot,
    /// Sequence for replies generated by the relay itself
    local_seq: u64,
}

impl Tables {
    fn remove_pending(&mut self, id: &str) -> Option<PendingRequest> {
        let entry = self.pending.remove(id)?;
        self.order.retain(|pending| pending != id);
        Some(entry)
    }

    /// Queue a reply received from the remote side, unless already seen
    fn enqueue(&mut self, response: JsonRpcResponse) -> bool {
        let fingerprint = fingerprint_response(&response);
        self.enqueue_as(fingerprint, response)
    }

    /// Queue a reply the relay produced; these are never deduplicated
    fn enqueue_local(&mut self, response: JsonRpcResponse) {
        self.local_seq += 1;
        let fingerprint =
            fingerprint_value(&format!("local-{}", self.local_seq), &Value::Null);
        self.enqueued.insert(fingerprint.clone());
        self.outbound.push_back((fingerprint, response));
    }

    fn enqueue_as(&mut self, fingerprint: Fingerprint, response: JsonRpcResponse) -> bool {
        if self.delivered.contains(&fingerprint) || !self.enqueued.insert(fingerprint.clone()) {
            return false;
        }
        self.outbound.push_back((fingerprint, response));
        true
    }
}

/// Shared relay state
#[derive(Debug)]
pub struct RelayState {
    tables: Mutex<Tables>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                pending: HashMap::new(),
                order: VecDeque::new(),
                outbound: VecDeque::new(),
                enqueued: HashSet::new(),
                delivered: HashSet::new(),
                lifecycle: HashSet::new(),
                handshake: Handshake::Idle,
                worker: WorkerSlot::default(),
                local_seq: 0,
            }),
        }
    }

    // ==================== Peer side ====================

    /// Take a request read from the peer
    ///
    /// Requests without an id get a relay-generated one and are tracked as
    /// silent. A repeated `initialize` is answered here so the remote
    /// session never sees it twice.
    pub fn admit(&self, request: JsonRpcRequest) -> Admission {
        let mut tables = self.tables.lock();

        if tables.worker.auth_rejected {
            if let Some(id) = request.id {
                tables.enqueue_local(JsonRpcResponse::error(id, auth_rejected_error()));
            }
            return Admission::Answered;
        }

        let is_initialize = request.method == INITIALIZE_METHOD;
        if is_initialize {
            let local = match &tables.handshake {
                Handshake::Acknowledged(result) => Some(Ok(result.clone())),
                Handshake::Pending(_) => Some(Err(JsonRpcError::new(
                    JsonRpcError::INIT_STATE,
                    INIT_IN_PROGRESS_MESSAGE,
                ))),
                Handshake::Idle => None,
            };
            if let Some(local) = local {
                debug!(id = ?request.id, "Answering duplicate initialize locally");
                if let Some(id) = request.id {
                    let response = match local {
                        Ok(result) => JsonRpcResponse::success(id, result),
                        Err(error) => JsonRpcResponse::error(id, error),
                    };
                    tables.enqueue_local(response);
                }
                return Admission::Answered;
            }
        }

        let (id, silent) = match request.id.clone() {
            Some(id) => (id, false),
            None => (RequestId::new(format!("relay-{}", Uuid::new_v4())), true),
        };
        let mut request = request;
        request.id = Some(id.clone());

        if is_initialize {
            tables.handshake = Handshake::Pending(id.as_str().to_string());
        }

        let key = id.as_str().to_string();
        if tables.pending.contains_key(&key) {
            warn!(id = %key, "Replacing pending request with a reused id");
        } else {
            tables.order.push_back(key.clone());
        }
        tables.pending.insert(
            key,
            PendingRequest {
                request,
                silent,
                sent_epoch: None,
            },
        );
        Admission::Forward(id)
    }

    /// Queue a locally generated reply for the peer
    pub fn answer(&self, response: JsonRpcResponse) {
        self.tables.lock().enqueue_local(response);
    }

    /// Next reply to write to the peer
    pub fn pop_outbound(&self) -> Option<(Fingerprint, JsonRpcResponse)> {
        self.tables.lock().outbound.pop_front()
    }

    /// Put back a reply whose write failed
    pub fn requeue_front(&self, fingerprint: Fingerprint, response: JsonRpcResponse) {
        self.tables.lock().outbound.push_front((fingerprint, response));
    }

    /// Record a successful write; false if it had already been written
    pub fn mark_delivered(&self, fingerprint: Fingerprint) -> bool {
        let mut tables = self.tables.lock();
        tables.enqueued.remove(&fingerprint);
        tables.delivered.insert(fingerprint)
    }

    pub fn is_delivered(&self, fingerprint: &Fingerprint) -> bool {
        self.tables.lock().delivered.contains(fingerprint)
    }

    // ==================== Worker side ====================

    /// Record a reply from the remote side
    pub fn on_response(&self, response: JsonRpcResponse) -> Delivery {
        let mut tables = self.tables.lock();

        if let Some(entry) = tables.remove_pending(response.id.as_str()) {
            if entry.request.method == INITIALIZE_METHOD
                && tables.handshake == Handshake::Pending(response.id.as_str().to_string())
            {
                tables.handshake = match (&response.result, &response.error) {
                    (Some(result), None) => {
                        info!(id = %response.id, "Handshake acknowledged");
                        Handshake::Acknowledged(result.clone())
                    }
                    _ => Handshake::Idle,
                };
            }
            if entry.silent {
                return Delivery::Consumed;
            }
        }

        if tables.enqueue(response) {
            Delivery::Enqueued
        } else {
            Delivery::Duplicate
        }
    }

    /// Surface the connection-established notice once per process
    pub fn on_connection_notice(&self, response: JsonRpcResponse) -> bool {
        let mut tables = self.tables.lock();
        let fingerprint = lifecycle_fingerprint(CONNECTION_ESTABLISHED);
        if !tables.lifecycle.insert(fingerprint.clone()) {
            return false;
        }
        tables.enqueue_as(fingerprint, response)
    }

    /// The peer's `initialize`, if it still needs sending on this epoch
    pub fn take_initialize(&self, epoch: u64) -> Option<JsonRpcRequest> {
        let mut tables = self.tables.lock();
        let Handshake::Pending(id) = tables.handshake.clone() else {
            return None;
        };
        let entry = tables.pending.get_mut(&id)?;
        if entry.sent_epoch == Some(epoch) {
            return None;
        }
        entry.sent_epoch = Some(epoch);
        Some(entry.request.clone())
    }

    /// Oldest pending request not yet sent on this epoch
    pub fn next_unsent(&self, epoch: u64) -> Option<JsonRpcRequest> {
        let mut tables = self.tables.lock();
        let Tables { pending, order, .. } = &mut *tables;
        order.iter().find_map(|id| {
            let entry = pending.get_mut(id)?;
            if entry.sent_epoch == Some(epoch) {
                return None;
            }
            entry.sent_epoch = Some(epoch);
            Some(entry.request.clone())
        })
    }

    /// Pending requests, oldest first
    pub fn pending_requests(&self) -> Vec<JsonRpcRequest> {
        let tables = self.tables.lock();
        tables
            .order
            .iter()
            .filter_map(|id| tables.pending.get(id))
            .map(|entry| entry.request.clone())
            .collect()
    }

    /// Drop a pending request without a reply
    pub fn abandon(&self, id: &str) -> bool {
        self.tables.lock().remove_pending(id).is_some()
    }

    pub fn has_pending(&self) -> bool {
        !self.tables.lock().pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.tables.lock().pending.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.tables.lock().outbound.len()
    }

    pub fn handshake(&self) -> Handshake {
        self.tables.lock().handshake.clone()
    }

    pub fn handshake_acknowledged(&self) -> bool {
        matches!(self.tables.lock().handshake, Handshake::Acknowledged(_))
    }

    // ==================== Worker slot ====================

    /// Claim the worker slot; false if a worker is already running or the
    /// credential was refused
    pub fn try_claim_worker(&self) -> bool {
        let mut tables = self.tables.lock();
        if tables.worker.running || tables.worker.auth_rejected {
            return false;
        }
        tables.worker.running = true;
        true
    }

    pub fn release_worker(&self) {
        let mut tables = self.tables.lock();
        tables.worker.running = false;
        tables.worker.connected = false;
    }

    /// Mark a connection as established and return its epoch
    pub fn begin_connection(&self) -> u64 {
        let mut tables = self.tables.lock();
        tables.worker.connected = true;
        tables.worker.epoch += 1;
        tables.worker.epoch
    }

    pub fn end_connection(&self) {
        self.tables.lock().worker.connected = false;
    }

    pub fn worker(&self) -> WorkerSlot {
        self.tables.lock().worker
    }

    pub fn is_auth_rejected(&self) -> bool {
        self.tables.lock().worker.auth_rejected
    }

    /// Stop for good: fail every pending request and refuse new ones
    ///
    /// Returns the number of requests answered.
    pub fn reject_auth(&self) -> usize {
        let mut tables = self.tables.lock();
        if tables.worker.auth_rejected {
            return 0;
        }
        tables.worker.auth_rejected = true;
        tables.worker.connected = false;
        tables.handshake = Handshake::Idle;

        let ids: Vec<String> = tables.order.drain(..).collect();
        let mut answered = 0;
        for id in ids {
            let Some(entry) = tables.pending.remove(&id) else {
                continue;
            };
            if entry.silent {
                continue;
            }
            tables.enqueue_local(JsonRpcResponse::error(id, auth_rejected_error()));
            answered += 1;
        }
        warn!(answered, "Authentication rejected; relay stopped forwarding");
        answered
    }
}

fn auth_rejected_error() -> JsonRpcError {
    JsonRpcError::new(JsonRpcError::SERVER_ERROR, AUTH_REJECTED_MESSAGE)
}
