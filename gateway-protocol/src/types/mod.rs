pub mod handshake;
pub mod log;
pub mod tool;

pub use handshake::*;
pub use log::*;
pub use tool::*;
