//! Local-peer loop
//!
//! Reads one JSON-RPC message per line from the peer and writes queued
//! replies back, one per line. No socket I/O happens here.

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use gateway_protocol::{
    encode_line, Frame, JsonLineCodec, JsonRpcRequest, JsonRpcResponse, RequestError,
};

use crate::relay::Relay;
use crate::state::Admission;

/// Why the peer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerExit {
    /// Input closed and the grace period ran out or nothing was in flight
    Eof,
    /// Writes kept failing
    Disconnected,
}

enum Flush {
    Idle,
    Written,
    Skipped,
    Failed,
}

/// Foreground loop over the peer's stdio
pub struct PeerLoop<'a, R, W> {
    relay: &'a Relay,
    lines: FramedRead<R, JsonLineCodec>,
    writer: W,
    write_failures: u32,
}

impl<'a, R, W> PeerLoop<'a, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(relay: &'a Relay, reader: R, writer: W) -> Self {
        Self {
            relay,
            lines: FramedRead::new(reader, JsonLineCodec::new()),
            writer,
            write_failures: 0,
        }
    }

    pub async fn run(mut self) -> PeerExit {
        let poll = self.relay.config().poll_interval;
        loop {
            match self.flush_one().await {
                Flush::Written | Flush::Skipped => continue,
                Flush::Failed if self.peer_gone() => return self.disconnected(),
                Flush::Failed | Flush::Idle => {}
            }

            tokio::select! {
                frame = self.lines.next() => match frame {
                    Some(Ok(Frame::Line(line))) => self.on_line(&line),
                    Some(Ok(Frame::Oversized { size })) => {
                        warn!(size, "Discarded oversized line from peer");
                        let error = RequestError::Parse(format!("message too large ({} bytes)", size));
                        self.relay.state().answer(error.to_response());
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to read from peer");
                        return self.drain_after_eof().await;
                    }
                    None => return self.drain_after_eof().await,
                },
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    fn on_line(&mut self, line: &str) {
        let request = match JsonRpcRequest::parse(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Rejected malformed message from peer");
                self.relay.state().answer(e.to_response());
                return;
            }
        };

        info!(method = %request.method, id = ?request.id, "Request from peer");
        match self.relay.state().admit(request) {
            Admission::Forward(id) => {
                debug!(id = %id, "Request pending");
                self.relay.ensure_worker();
            }
            Admission::Answered => {}
        }
    }

    /// Write at most one queued reply
    async fn flush_one(&mut self) -> Flush {
        let relay = self.relay;
        let state = relay.state();
        let Some((fingerprint, response)) = state.pop_outbound() else {
            return Flush::Idle;
        };
        if state.is_delivered(&fingerprint) {
            debug!(id = %response.id, "Skipping reply already written");
            return Flush::Skipped;
        }

        match self.write_response(&response).await {
            Ok(()) => {
                self.write_failures = 0;
                state.mark_delivered(fingerprint);
                Flush::Written
            }
            Err(e) => {
                self.write_failures += 1;
                warn!(
                    id = %response.id,
                    failures = self.write_failures,
                    error = %e,
                    "Failed to write reply to peer"
                );
                state.requeue_front(fingerprint, response);
                Flush::Failed
            }
        }
    }

    async fn write_response(&mut self, response: &JsonRpcResponse) -> std::io::Result<()> {
        let line = encode_line(response).map_err(std::io::Error::other)?;
        let attempts = self.relay.config().write_retries.max(1);
        let pause = self.relay.config().write_retry_pause;

        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.write_line(&line).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(attempt, attempts, error = %e, "Write to peer failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| std::io::Error::other("no write attempted")))
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(line).await?;
        self.writer.flush().await
    }

    fn peer_gone(&self) -> bool {
        self.write_failures >= self.relay.config().max_write_failures
    }

    fn disconnected(&self) -> PeerExit {
        warn!(failures = self.write_failures, "Peer stopped accepting output");
        self.relay
            .shipper()
            .warning("Peer disconnected", Some(json!({"failures": self.write_failures})));
        PeerExit::Disconnected
    }

    /// Keep writing replies for requests still in flight, up to the grace period
    async fn drain_after_eof(&mut self) -> PeerExit {
        let relay = self.relay;
        let grace = relay.config().eof_grace;
        let poll = relay.config().poll_interval;
        let pending = relay.state().pending_len();
        info!(pending, grace_ms = grace.as_millis() as u64, "Peer input closed");

        let deadline = Instant::now() + grace;
        loop {
            match self.flush_one().await {
                Flush::Written | Flush::Skipped => continue,
                Flush::Failed if self.peer_gone() => return self.disconnected(),
                Flush::Failed | Flush::Idle => {}
            }

            let state = relay.state();
            if !state.has_pending() && state.outbound_len() == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(pending = state.pending_len(), "Grace period ended with requests in flight");
                break;
            }
            tokio::time::sleep(poll.min(deadline - now).max(Duration::from_millis(1))).await;
        }
        PeerExit::Eof
    }
}
