//! Log records and the log sink API payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default page size for log queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Largest page a log query may request
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Severity of a shipped log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Error returned when parsing an unknown level name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid log level: {0}")]
pub struct ParseLevelError(pub String);

impl std::str::FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// A structured log record produced by a session or relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(
        rename = "log_metadata",
        alias = "metadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata: Option<Map<String, Value>>,
}

impl LogRecord {
    /// Create a record stamped with the current time
    pub fn new(level: LogLevel, message: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            connection_id: connection_id.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Attach metadata
    ///
    /// Non-object values are stored under a `value` key.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = match metadata {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                Some(map)
            }
        };
        self
    }
}

/// Body of the batch-create endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    pub logs: Vec<LogRecord>,
}

impl LogBatch {
    pub fn new(logs: Vec<LogRecord>) -> Self {
        Self { logs }
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// A record as held by the sink, with its assigned id and owning app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLogRecord {
    pub id: u64,
    pub app_id: String,
    #[serde(flatten)]
    pub record: LogRecord,
}

/// Filters and pagination for the query endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub level: Option<LogLevel>,
    pub connection_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            level: None,
            connection_id: None,
            start_time: None,
            end_time: None,
            skip: 0,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl LogQuery {
    /// Check whether a record passes every filter
    pub fn matches(&self, record: &LogRecord) -> bool {
        if self.level.is_some_and(|level| level != record.level) {
            return false;
        }
        if let Some(ref conn) = self.connection_id {
            if *conn != record.connection_id {
                return false;
            }
        }
        if self.start_time.is_some_and(|start| record.timestamp < start) {
            return false;
        }
        if self.end_time.is_some_and(|end| record.timestamp > end) {
            return false;
        }
        true
    }

    /// Page size clamped to the allowed maximum
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_QUERY_LIMIT)
    }
}

/// Response of the query endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogPage {
    pub total: usize,
    pub logs: Vec<StoredLogRecord>,
}
