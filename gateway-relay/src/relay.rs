//! Relay wiring: shared state plus the background tasks around it

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use gateway_utils::{LogShipper, Result};

use crate::config::RelayConfig;
use crate::fallback::HttpFallback;
use crate::heartbeat::Heartbeat;
use crate::peer::{PeerExit, PeerLoop};
use crate::state::RelayState;
use crate::worker::Worker;

/// How long shutdown waits for each background task
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A running relay
pub struct Relay {
    config: Arc<RelayConfig>,
    state: Arc<RelayState>,
    shipper: Arc<LogShipper>,
    fallback: Arc<HttpFallback>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Relay {
    pub fn new(config: RelayConfig, shipper: Arc<LogShipper>) -> Result<Self> {
        let fallback = Arc::new(HttpFallback::new(&config)?);
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            state: Arc::new(RelayState::new()),
            shipper,
            fallback,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    pub fn shipper(&self) -> &Arc<LogShipper> {
        &self.shipper
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Start the heartbeat task
    pub fn start_heartbeat(&self) -> Result<()> {
        let heartbeat = Heartbeat::new(&self.config)?;
        let task = tokio::spawn(heartbeat.run(
            Arc::clone(&self.state),
            Arc::clone(&self.shipper),
            self.shutdown_tx.subscribe(),
        ));
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Start the socket worker unless one is already running
    ///
    /// Returns true if a new worker was spawned.
    pub fn ensure_worker(&self) -> bool {
        if self.is_shutting_down() || !self.state.try_claim_worker() {
            return false;
        }

        debug!("Spawning socket worker");
        let worker = Worker::new(
            Arc::clone(&self.config),
            Arc::clone(&self.state),
            Arc::clone(&self.shipper),
            Arc::clone(&self.fallback),
            self.shutdown_tx.subscribe(),
        );
        let task = tokio::spawn(worker.run());

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        true
    }

    /// Serve a local peer until it goes away
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> PeerExit
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let exit = PeerLoop::new(self, reader, writer).run().await;
        info!(exit = ?exit, "Peer loop finished");
        exit
    }

    /// Cancel the worker and heartbeat
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(TASK_STOP_TIMEOUT, task).await.is_err() {
                warn!("Background task did not stop in time; aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests;
