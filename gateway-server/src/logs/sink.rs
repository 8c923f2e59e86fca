use std::sync::Arc;

use futures::future::BoxFuture;

use gateway_protocol::LogBatch;
use gateway_utils::{LogSink, Result};

use super::store::LogStore;

/// Ships a session's batches straight into the server's own store
pub struct StoreSink {
    app_id: String,
    store: Arc<LogStore>,
}

impl StoreSink {
    pub fn new(app_id: impl Into<String>, store: Arc<LogStore>) -> Self {
        Self {
            app_id: app_id.into(),
            store,
        }
    }
}

impl LogSink for StoreSink {
    fn deliver<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.store.insert_batch(&self.app_id, batch.logs.clone());
            Ok(())
        })
    }
}
