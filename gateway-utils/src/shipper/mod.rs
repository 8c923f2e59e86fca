//! Buffered, retrying log shipping
//!
//! A [`LogShipper`] sits beside each bridge connection (and the relay). Every
//! record is first mirrored to an append-only [`FallbackStore`], then
//! buffered in memory and delivered to a [`LogSink`] in batches, either when
//! the buffer fills or on a periodic timer.
//!
//! Flushes are single-flight: a flush swaps the buffer out under the lock and
//! then sends, so concurrent `log()` calls only ever append to the fresh
//! buffer. Batches that still fail after every retry are merged back in front
//! of newer records; if that pushes the buffer past twice its nominal size,
//! only the newest `buffer_size` records are kept.

mod fallback;
mod sink;

pub use fallback::FallbackStore;
pub use sink::{LogSink, NullSink};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gateway_protocol::{LogBatch, LogLevel, LogRecord};

use crate::{paths, Result};

/// Log shipper tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    /// Records buffered before an automatic flush
    pub buffer_size: usize,
    /// Periodic flush interval
    pub flush_interval_ms: u64,
    /// Delivery attempts per flush
    pub max_retries: u32,
    /// Base unit of the exponential backoff between attempts
    pub backoff_unit_ms: u64,
    /// Cap on a single backoff pause
    pub max_backoff_ms: u64,
    /// Bound on the final flush performed by `stop()`
    pub stop_timeout_ms: u64,
    /// Directory for fallback files (defaults to the XDG log dir)
    pub fallback_dir: Option<PathBuf>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            flush_interval_ms: 5_000,
            max_retries: 3,
            backoff_unit_ms: 1_000,
            max_backoff_ms: 30_000,
            stop_timeout_ms: 5_000,
            fallback_dir: None,
        }
    }
}

impl ShipperConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Pause after failed attempt `attempt` (0-based): `min(2^attempt units, cap)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self
            .backoff_unit_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    fn fallback_dir(&self) -> PathBuf {
        self.fallback_dir.clone().unwrap_or_else(paths::log_dir)
    }
}

/// What a call to `flush()` accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,
    /// This many records reached the sink
    Delivered(usize),
    /// Delivery failed; this many records went back into the buffer
    Retained(usize),
}

struct ShipperInner {
    connection_id: String,
    config: ShipperConfig,
    sink: Arc<dyn LogSink>,
    fallback: FallbackStore,
    buffer: Mutex<Vec<LogRecord>>,
    /// Held for the whole swap-then-send cycle
    in_flight: tokio::sync::Mutex<()>,
    /// A size-triggered flush has been spawned but not yet started
    flush_requested: AtomicBool,
}

impl ShipperInner {
    async fn flush(&self) -> FlushOutcome {
        let _flight = self.in_flight.lock().await;
        self.flush_requested.store(false, Ordering::Release);

        let logs = std::mem::take(&mut *self.buffer.lock());
        if logs.is_empty() {
            return FlushOutcome::Empty;
        }
        let mut batch = InFlight {
            inner: self,
            batch: LogBatch::new(logs),
            delivered: false,
        };
        let count = batch.batch.len();

        let attempts = self.config.max_retries.max(1);
        for attempt in 0..attempts {
            match self.sink.deliver(&batch.batch).await {
                Ok(()) => {
                    batch.delivered = true;
                    debug!(
                        connection_id = %self.connection_id,
                        records = count,
                        "Shipped log batch"
                    );
                    return FlushOutcome::Delivered(count);
                }
                Err(e) => {
                    warn!(
                        connection_id = %self.connection_id,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Failed to ship log batch"
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.config.backoff(attempt)).await;
                    }
                }
            }
        }

        FlushOutcome::Retained(count)
    }

    /// Put an undelivered batch back ahead of anything logged since the swap
    fn merge_back(&self, mut logs: Vec<LogRecord>) {
        let mut buffer = self.buffer.lock();
        logs.append(&mut buffer);
        let limit = self.config.buffer_size.max(1);
        if logs.len() > limit * 2 {
            let excess = logs.len() - limit;
            logs.drain(..excess);
            warn!(
                connection_id = %self.connection_id,
                dropped = excess,
                "Log buffer over capacity, dropped oldest records"
            );
        }
        *buffer = logs;
    }
}

/// A batch swapped out of the buffer
///
/// Unless marked delivered it goes back into the buffer on drop, which also
/// covers a flush cancelled mid-delivery.
struct InFlight<'a> {
    inner: &'a ShipperInner,
    batch: LogBatch,
    delivered: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.delivered {
            self.inner.merge_back(std::mem::take(&mut self.batch.logs));
        }
    }
}

/// Per-connection buffered log shipper
pub struct LogShipper {
    inner: Arc<ShipperInner>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogShipper")
            .field("connection_id", &self.inner.connection_id)
            .field("buffered", &self.buffered())
            .field("fallback", &self.inner.fallback.path())
            .finish()
    }
}

impl LogShipper {
    /// Create a shipper for one connection
    ///
    /// Fails if the fallback store cannot be opened.
    pub fn new(
        connection_id: impl Into<String>,
        config: ShipperConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let connection_id = connection_id.into();
        let path = paths::fallback_log_file(&config.fallback_dir(), &connection_id);
        let fallback = FallbackStore::open(path)?;
        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(ShipperInner {
                connection_id,
                config,
                sink,
                fallback,
                buffer: Mutex::new(Vec::new()),
                in_flight: tokio::sync::Mutex::new(()),
                flush_requested: AtomicBool::new(false),
            }),
            stop_tx,
            task: Mutex::new(None),
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn config(&self) -> &ShipperConfig {
        &self.inner.config
    }

    /// Path of the fallback store
    pub fn fallback_path(&self) -> &std::path::Path {
        self.inner.fallback.path()
    }

    /// Number of records waiting to be shipped
    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Start the periodic flush task (no-op if already running)
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut stop_rx = self.stop_tx.subscribe();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.flush_interval());
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        inner.flush().await;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        }));
    }

    /// Record a log entry
    ///
    /// The record is mirrored to the fallback store before it is buffered. A
    /// full buffer schedules a flush on the current runtime.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, metadata: Option<Value>) {
        let mut record = LogRecord::new(level, message, self.inner.connection_id.clone());
        if let Some(metadata) = metadata {
            record = record.with_metadata(metadata);
        }

        if let Err(e) = self.inner.fallback.append(&record) {
            warn!(
                connection_id = %self.inner.connection_id,
                error = %e,
                "Failed to write fallback log record"
            );
        }

        let full = {
            let mut buffer = self.inner.buffer.lock();
            buffer.push(record);
            buffer.len() >= self.inner.config.buffer_size
        };

        if full && !self.inner.flush_requested.swap(true, Ordering::AcqRel) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let inner = Arc::clone(&self.inner);
                    handle.spawn(async move {
                        inner.flush().await;
                    });
                }
                Err(_) => self.inner.flush_requested.store(false, Ordering::Release),
            }
        }
    }

    pub fn debug(&self, message: impl Into<String>, metadata: Option<Value>) {
        self.log(LogLevel::Debug, message, metadata);
    }

    pub fn info(&self, message: impl Into<String>, metadata: Option<Value>) {
        self.log(LogLevel::Info, message, metadata);
    }

    pub fn warning(&self, message: impl Into<String>, metadata: Option<Value>) {
        self.log(LogLevel::Warning, message, metadata);
    }

    pub fn error(&self, message: impl Into<String>, metadata: Option<Value>) {
        self.log(LogLevel::Error, message, metadata);
    }

    /// Ship everything buffered right now
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush().await
    }

    /// Cancel the periodic task and perform one final bounded flush
    pub async fn stop(&self) -> FlushOutcome {
        self.stop_tx.send_replace(true);
        let task = self.task.lock().take();
        let timeout = self.inner.config.stop_timeout();

        if let Some(mut task) = task {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!(
                    connection_id = %self.inner.connection_id,
                    "Periodic flush did not finish before stop timeout"
                );
                // Aborting drops its in-flight batch back into the buffer
                task.abort();
                let _ = task.await;
            }
        }

        match tokio::time::timeout(timeout, self.inner.flush()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    connection_id = %self.inner.connection_id,
                    "Final log flush timed out"
                );
                FlushOutcome::Retained(self.buffered())
            }
        }
    }
}

impl Drop for LogShipper {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
