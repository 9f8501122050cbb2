//! Core error types for gangway

use std::path::PathBuf;
use thiserror::Error;

/// Session and channel errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Channel already bound to an exec or shell adapter
    #[error("Channel is already bound to an adapter")]
    AlreadyBound,

    /// Channel is not known to the session router
    #[error("Unknown channel")]
    UnknownChannel,

    /// PTY allocation failed
    #[error("PTY allocation failed: {0}")]
    PtyAllocation(String),

    /// Process spawn failed
    #[error("Failed to spawn {command}: {reason}")]
    Spawn { command: String, reason: String },
}

/// Port forwarding errors
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Listener could not bind
    #[error("Failed to bind {address}:{port}: {source}")]
    Bind {
        address: String,
        port: u32,
        source: std::io::Error,
    },

    /// Requested port is outside the valid TCP range
    #[error("Invalid port: {0}")]
    InvalidPort(u32),

    /// Outbound connect failed
    #[error("Failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u32,
        source: std::io::Error,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
