//! Configuration management for the bridge server

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::*;
