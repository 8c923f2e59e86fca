//! State shared by every connection handler

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};

use gateway_utils::{LogShipper, Result};

use crate::auth::{AppIdentity, AppRegistry};
use crate::bridge::{BridgeSession, Connection};
use crate::config::AppConfig;
use crate::logs::{LogStore, StoreSink};
use crate::tools::CapabilityProvider;

/// Bridge session reachable through the HTTP fallback endpoint
pub type SharedSession = Arc<Mutex<BridgeSession>>;

/// Shared server state
pub struct ServerState {
    pub config: AppConfig,
    pub apps: AppRegistry,
    pub tools: Arc<dyn CapabilityProvider>,
    pub logs: Arc<LogStore>,
    pub started_at: DateTime<Utc>,
    /// Broadcast to stop the listener and every open connection
    pub shutdown_tx: broadcast::Sender<()>,
    /// Persistent HTTP-fallback sessions keyed by app and relay session
    rpc_sessions: Mutex<HashMap<(String, String), SharedSession>>,
}

impl ServerState {
    pub fn new(config: AppConfig, tools: Arc<dyn CapabilityProvider>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            apps: AppRegistry::new(&config.apps),
            config,
            tools,
            logs: Arc::new(LogStore::new()),
            started_at: Utc::now(),
            shutdown_tx,
            rpc_sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Build a session for a freshly authenticated connection
    ///
    /// The session's log shipper delivers into the server's log store.
    pub fn open_session(&self, app: AppIdentity) -> Result<BridgeSession> {
        let connection = Connection::open(app);
        let sink = Arc::new(StoreSink::new(
            connection.app.app_id.clone(),
            Arc::clone(&self.logs),
        ));
        let shipper = LogShipper::new(
            connection.connection_id.clone(),
            self.config.log_shipper.clone(),
            sink,
        )?;
        Ok(BridgeSession::new(connection, Arc::clone(&self.tools), shipper))
    }

    /// The HTTP-fallback session for one relay of an app, created on first use
    ///
    /// Requests without a relay session id share the app's anonymous session.
    pub async fn rpc_session(
        &self,
        app: &AppIdentity,
        relay_session: Option<&str>,
    ) -> Result<SharedSession> {
        let key = (
            app.app_id.clone(),
            relay_session.unwrap_or_default().to_string(),
        );
        let mut sessions = self.rpc_sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            return Ok(Arc::clone(session));
        }

        let session = self.open_session(app.clone())?;
        session.start();
        let session = Arc::new(Mutex::new(session));
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Close every HTTP-fallback session
    pub async fn close_rpc_sessions(&self) {
        let sessions: Vec<SharedSession> =
            self.rpc_sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.lock().await.close().await;
        }
    }
}
