//! SSH server: connection handler and listener

pub mod handler;
pub mod listener;

pub use handler::{ConnectionController, ServerConfig};
pub use listener::{load_or_generate_host_key, SshServer};
