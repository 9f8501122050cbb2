//! gangway SSH server library
//!
//! The server accepts authenticated SSH connections and wires each
//! channel to a real OS resource: a spawned process for exec requests,
//! a pseudo-terminal for interactive shells, or a TCP peer for port
//! forwarding.

pub mod auth;
pub mod channel;
pub mod forward;
pub mod server;
pub mod session;

pub use auth::{AuthDecision, Authenticator, AuthorizedKeySet};
pub use server::{ConnectionController, SshServer};
pub use session::SessionRouter;
