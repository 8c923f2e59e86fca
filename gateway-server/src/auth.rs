//! API-key authentication of bridge clients
//!
//! Keys come from the `[[apps]]` section of the configuration. Every transport
//! and HTTP request presents its key in the `X-API-Key` header.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::config::AppEntry;

/// Authenticated owner of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_id: String,
    pub name: String,
}

/// Result of checking a presented key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted(AppIdentity),
    /// The key is known but its app has been deactivated
    Inactive(AppIdentity),
    Rejected,
}

struct AppRecord {
    identity: AppIdentity,
    active: bool,
}

/// Registered applications, looked up by API key
pub struct AppRegistry {
    by_key: HashMap<String, AppRecord>,
    last_connected: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl AppRegistry {
    pub fn new(apps: &[AppEntry]) -> Self {
        let by_key = apps
            .iter()
            .map(|app| {
                (
                    app.api_key.clone(),
                    AppRecord {
                        identity: AppIdentity {
                            app_id: app.app_id.clone(),
                            name: app.name.clone(),
                        },
                        active: app.active,
                    },
                )
            })
            .collect();

        Self {
            by_key,
            last_connected: RwLock::new(HashMap::new()),
        }
    }

    pub fn authenticate(&self, api_key: Option<&str>) -> AuthOutcome {
        let Some(record) = api_key.and_then(|key| self.by_key.get(key)) else {
            return AuthOutcome::Rejected;
        };
        if record.active {
            AuthOutcome::Accepted(record.identity.clone())
        } else {
            AuthOutcome::Inactive(record.identity.clone())
        }
    }

    /// Identity for an active app's key, if any
    pub fn active_identity(&self, api_key: Option<&str>) -> Option<AppIdentity> {
        match self.authenticate(api_key) {
            AuthOutcome::Accepted(identity) => Some(identity),
            _ => None,
        }
    }

    /// Stamp the app's last contact time
    pub fn touch(&self, app_id: &str) -> DateTime<Utc> {
        let now = Utc::now();
        self.last_connected.write().insert(app_id.to_string(), now);
        now
    }

    pub fn last_connected(&self, app_id: &str) -> Option<DateTime<Utc>> {
        self.last_connected.read().get(app_id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
