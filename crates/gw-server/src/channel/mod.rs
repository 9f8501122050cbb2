//! Channel adapters
//!
//! Each SSH channel that carries real work is bound to exactly one
//! adapter owning exactly one OS resource: an [`exec`] adapter owning a
//! child process or a [`shell`] adapter owning a PTY. Adapters talk
//! back to the transport through the [`ChannelSink`] capability so the
//! data-pumping logic never depends on a live connection.

pub mod exec;
pub mod shell;

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec, Sig};

use gw_core::signal::signal_name;

/// Outbound side of a channel, as seen by an adapter.
///
/// Exit notifications are sent at most once, after the adapter's OS
/// resource has terminated; `close` ends the channel.
#[async_trait]
pub trait ChannelSink: Send + Sync + 'static {
    /// Write to the channel's standard output stream
    async fn data(&self, data: &[u8]);
    /// Write to an extended stream (1 = stderr)
    async fn extended_data(&self, ext: u32, data: &[u8]);
    /// Report normal process termination
    async fn exit_status(&self, status: u32);
    /// Report termination by signal
    async fn exit_signal(&self, signal: Sig);
    /// Signal end of output
    async fn eof(&self);
    /// Close the channel
    async fn close(&self);
}

/// Inbound control messages routed to an adapter
#[derive(Debug)]
pub enum AdapterControl {
    /// Channel data destined for the process's input
    Stdin(Vec<u8>),
    /// Client sent EOF; no more input will arrive
    StdinEof,
    /// Terminal dimensions changed
    Resize { cols: u32, rows: u32 },
    /// Channel closed by the client; tear down the OS resource
    Close,
}

/// Production [`ChannelSink`] backed by a russh session handle.
///
/// Send failures mean the client is gone; the adapter finds out
/// through its control channel, so errors are dropped here.
pub struct SessionChannelSink {
    handle: Handle,
    id: ChannelId,
}

impl SessionChannelSink {
    pub fn new(handle: Handle, id: ChannelId) -> Self {
        Self { handle, id }
    }
}

#[async_trait]
impl ChannelSink for SessionChannelSink {
    async fn data(&self, data: &[u8]) {
        let _ = self.handle.data(self.id, CryptoVec::from_slice(data)).await;
    }

    async fn extended_data(&self, ext: u32, data: &[u8]) {
        let _ = self
            .handle
            .extended_data(self.id, ext, CryptoVec::from_slice(data))
            .await;
    }

    async fn exit_status(&self, status: u32) {
        let _ = self.handle.exit_status_request(self.id, status).await;
    }

    async fn exit_signal(&self, signal: Sig) {
        let _ = self
            .handle
            .exit_signal_request(self.id, signal, false, String::new(), String::new())
            .await;
    }

    async fn eof(&self) {
        let _ = self.handle.eof(self.id).await;
    }

    async fn close(&self) {
        let _ = self.handle.close(self.id).await;
    }
}

/// Map a termination signal number to the wire representation
pub fn exit_signal_for(signal: i32) -> Sig {
    match signal_name(signal) {
        Some(name) => sig_from_name(name),
        None => Sig::Custom(signal.to_string()),
    }
}

fn sig_from_name(name: &str) -> Sig {
    match name {
        "ABRT" => Sig::ABRT,
        "ALRM" => Sig::ALRM,
        "FPE" => Sig::FPE,
        "HUP" => Sig::HUP,
        "ILL" => Sig::ILL,
        "INT" => Sig::INT,
        "KILL" => Sig::KILL,
        "PIPE" => Sig::PIPE,
        "QUIT" => Sig::QUIT,
        "SEGV" => Sig::SEGV,
        "TERM" => Sig::TERM,
        "USR1" => Sig::USR1,
        other => Sig::Custom(other.to_string()),
    }
}
