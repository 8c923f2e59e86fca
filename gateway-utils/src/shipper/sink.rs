use futures::future::BoxFuture;
use gateway_protocol::LogBatch;

use crate::Result;

/// Destination for shipped log batches
///
/// Implementations return `Err` for any delivery failure; the shipper owns
/// retry and fallback policy.
pub trait LogSink: Send + Sync {
    fn deliver<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<()>>;
}

/// Sink that accepts and discards every batch
///
/// Used when remote shipping is disabled; records still reach the fallback
/// store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn deliver<'a>(&'a self, _batch: &'a LogBatch) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
