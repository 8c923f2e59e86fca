use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::auth::AppIdentity;

/// Process-wide counter for connection ids
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a connection id of the form `bridge-<n>-<YYYYmmddHHMMSS>`
pub fn next_connection_id() -> String {
    let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("bridge-{}-{}", n, Utc::now().format("%Y%m%d%H%M%S"))
}

/// One authenticated transport connection
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: String,
    pub app: AppIdentity,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Connection {
    pub fn new(connection_id: impl Into<String>, app: AppIdentity) -> Self {
        let now = Utc::now();
        Self {
            connection_id: connection_id.into(),
            app,
            connected_at: now,
            last_heartbeat: now,
        }
    }

    /// Open a connection under a freshly allocated id
    pub fn open(app: AppIdentity) -> Self {
        Self::new(next_connection_id(), app)
    }
}
