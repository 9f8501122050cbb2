//! Core abstractions shared across the gangway workspace.
//!
//! Holds the configuration model, the error taxonomy, and the
//! signal-name table used for channel exit reporting. Nothing in this
//! crate touches the network.

pub mod config;
pub mod error;
pub mod signal;

pub use config::ServerConfig;
pub use error::{ConfigError, ForwardError, SessionError};
