//! In-memory log sink backing the log API

use std::collections::HashMap;

use parking_lot::RwLock;

use gateway_protocol::{LogPage, LogQuery, LogRecord, StoredLogRecord};

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    by_app: HashMap<String, Vec<StoredLogRecord>>,
}

/// Log records of every app, in arrival order
#[derive(Default)]
pub struct LogStore {
    inner: RwLock<StoreInner>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a batch for `app_id`, returning the created records
    pub fn insert_batch(&self, app_id: &str, logs: Vec<LogRecord>) -> Vec<StoredLogRecord> {
        let mut inner = self.inner.write();
        let mut created = Vec::with_capacity(logs.len());
        for record in logs {
            inner.next_id += 1;
            created.push(StoredLogRecord {
                id: inner.next_id,
                app_id: app_id.to_string(),
                record,
            });
        }
        inner
            .by_app
            .entry(app_id.to_string())
            .or_default()
            .extend(created.iter().cloned());
        created
    }

    /// Matching records of one app, newest first, with the unpaged total
    pub fn query(&self, app_id: &str, query: &LogQuery) -> LogPage {
        let inner = self.inner.read();
        let Some(records) = inner.by_app.get(app_id) else {
            return LogPage::default();
        };

        let matching: Vec<&StoredLogRecord> = records
            .iter()
            .rev()
            .filter(|stored| query.matches(&stored.record))
            .collect();

        LogPage {
            total: matching.len(),
            logs: matching
                .into_iter()
                .skip(query.skip)
                .take(query.effective_limit())
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_app.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
