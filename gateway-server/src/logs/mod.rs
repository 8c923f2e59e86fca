//! Server-side log sink

mod sink;
mod store;

pub use sink::StoreSink;
pub use store::LogStore;
