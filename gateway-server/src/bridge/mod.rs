//! Bridge sessions
//!
//! A [`BridgeSession`] owns the JSON-RPC state machine of one authenticated
//! connection. The WebSocket transport in [`transport`] feeds it one message
//! at a time; the HTTP fallback endpoint reuses the same type with a session
//! kept per app.

pub mod connection;
pub mod error;
pub mod session;
pub mod transport;


pub use connection::{next_connection_id, Connection};
pub use error::SessionError;
pub use session::{BridgeSession, SessionState};
pub use transport::{close_with, reject_with_auth_failure, run_session};
