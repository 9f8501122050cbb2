//! Session sub-request routing
//!
//! Tracks per-channel session state and dispatches pty, shell, exec,
//! env, subsystem, and window-change sub-requests. A channel binds to
//! at most one adapter for its whole life: exec and shell are terminal
//! bindings, never reassigned.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use russh::ChannelId;
use tokio::sync::mpsc;

use gw_core::error::SessionError;

use crate::channel::exec::ExecChannelAdapter;
use crate::channel::shell::InteractiveShellAdapter;
use crate::channel::{AdapterControl, ChannelSink};

/// Terminal parameters recorded by a pty request and consumed by the
/// shell request that follows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyInfo {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtyInfo {
    fn default() -> Self {
        Self {
            term: "xterm-color".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// What a channel is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Unbound,
    Exec,
    Shell,
}

/// Per-channel session state
struct SessionChannel {
    /// Set by a pty request, taken by the shell request
    pty: Option<PtyInfo>,
    binding: Binding,
    /// Control sender of the bound adapter
    control: Option<mpsc::Sender<AdapterControl>>,
}

impl SessionChannel {
    fn new() -> Self {
        Self {
            pty: None,
            binding: Binding::Unbound,
            control: None,
        }
    }
}

/// Routes session sub-requests to channel adapters.
///
/// Generic over the channel key so tests can drive it without a live
/// transport; the server uses [`ChannelId`] keys.
pub struct SessionRouter<K: Eq + Hash + Copy = ChannelId> {
    /// Shell used for exec commands and interactive sessions
    shell: String,
    channels: HashMap<K, SessionChannel>,
}

impl<K: Eq + Hash + Copy> SessionRouter<K> {
    pub fn new(shell: String) -> Self {
        Self {
            shell,
            channels: HashMap::new(),
        }
    }

    /// Register a newly opened session channel
    pub fn open_channel(&mut self, id: K) {
        self.channels.insert(id, SessionChannel::new());
    }

    /// Record terminal parameters for a later shell request.
    /// Always accepted for a known channel.
    pub fn record_pty(&mut self, id: K, info: PtyInfo) -> bool {
        match self.channels.get_mut(&id) {
            Some(channel) => {
                channel.pty = Some(info);
                true
            }
            None => false,
        }
    }

    /// Bind the channel to a new exec adapter running `command`
    pub fn start_exec(
        &mut self,
        id: K,
        command: &str,
        sink: Arc<dyn ChannelSink>,
    ) -> Result<(), SessionError> {
        let shell = self.shell.clone();
        let channel = self
            .channels
            .get_mut(&id)
            .ok_or(SessionError::UnknownChannel)?;
        if channel.binding != Binding::Unbound {
            return Err(SessionError::AlreadyBound);
        }

        let control = ExecChannelAdapter::spawn(&shell, command, sink)?;
        channel.binding = Binding::Exec;
        channel.control = Some(control);
        Ok(())
    }

    /// Bind the channel to an interactive shell, consuming the
    /// recorded PtyInfo or falling back to defaults
    pub fn start_shell(&mut self, id: K, sink: Arc<dyn ChannelSink>) -> Result<(), SessionError> {
        let shell = self.shell.clone();
        let channel = self
            .channels
            .get_mut(&id)
            .ok_or(SessionError::UnknownChannel)?;
        if channel.binding != Binding::Unbound {
            return Err(SessionError::AlreadyBound);
        }

        let pty = channel.pty.take().unwrap_or_default();
        let control = InteractiveShellAdapter::spawn(&shell, &pty, sink)?;
        channel.binding = Binding::Shell;
        channel.control = Some(control);
        Ok(())
    }

    /// Forward a window-change to a running shell.
    ///
    /// The resize itself is advisory; the request is acknowledged
    /// whenever a shell is bound. Returns false for exec-bound or
    /// unbound channels.
    pub async fn window_change(&mut self, id: K, cols: u32, rows: u32) -> bool {
        let Some(channel) = self.channels.get(&id) else {
            return false;
        };
        if channel.binding != Binding::Shell {
            return false;
        }
        if let Some(control) = &channel.control {
            let _ = control.send(AdapterControl::Resize { cols, rows }).await;
            true
        } else {
            false
        }
    }

    /// env requests are accepted without applying the variable
    pub fn env_request(&self, id: K, name: &str, value: &str) -> bool {
        tracing::debug!("Ignoring env {}={}", name, value);
        self.channels.contains_key(&id)
    }

    /// Subsystems (sftp and friends) are not supported
    pub fn subsystem_request(&self, name: &str) -> bool {
        tracing::debug!("Rejecting subsystem request: {}", name);
        false
    }

    /// Agent forwarding is not supported
    pub fn agent_request(&self) -> bool {
        false
    }

    /// Route channel data to the bound adapter's input
    pub async fn data(&mut self, id: K, data: &[u8]) {
        if let Some(control) = self.control_for(id) {
            let _ = control.send(AdapterControl::Stdin(data.to_vec())).await;
        }
    }

    /// Client sent EOF; no further input for this channel
    pub async fn eof(&mut self, id: K) {
        if let Some(control) = self.control_for(id) {
            let _ = control.send(AdapterControl::StdinEof).await;
        }
    }

    /// Client closed the channel; tear down its adapter
    pub async fn close_channel(&mut self, id: K) {
        if let Some(channel) = self.channels.remove(&id) {
            if let Some(control) = channel.control {
                let _ = control.send(AdapterControl::Close).await;
            }
        }
    }

    fn control_for(&self, id: K) -> Option<mpsc::Sender<AdapterControl>> {
        self.channels.get(&id).and_then(|c| c.control.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::test_support::RecordingSink;
    use std::time::Duration;
    use tokio::time::timeout;

    fn router() -> SessionRouter<u32> {
        SessionRouter::new("/bin/sh".to_string())
    }

    #[tokio::test]
    async fn test_exec_through_router() {
        let mut router = router();
        let sink = RecordingSink::new();

        router.open_channel(1);
        router.start_exec(1, "echo routed", sink.clone()).unwrap();

        timeout(Duration::from_secs(5), sink.wait_closed())
            .await
            .expect("channel never closed");
        assert_eq!(sink.stdout(), b"routed\n");
    }

    #[tokio::test]
    async fn test_exec_on_unknown_channel_fails() {
        let mut router = router();
        let sink = RecordingSink::new();

        let result = router.start_exec(9, "echo hi", sink);
        assert!(matches!(result, Err(SessionError::UnknownChannel)));
    }

    #[tokio::test]
    async fn test_channel_binding_is_terminal() {
        let mut router = router();
        let sink = RecordingSink::new();

        router.open_channel(1);
        router.start_exec(1, "sleep 5", sink.clone()).unwrap();

        let again = router.start_exec(1, "echo nope", sink.clone());
        assert!(matches!(again, Err(SessionError::AlreadyBound)));
        let shell = router.start_shell(1, sink.clone());
        assert!(matches!(shell, Err(SessionError::AlreadyBound)));

        router.close_channel(1).await;
    }

    #[tokio::test]
    async fn test_pty_info_consumed_by_shell() {
        let mut router = router();
        let sink = RecordingSink::new();

        router.open_channel(1);
        assert!(router.record_pty(
            1,
            PtyInfo {
                term: "xterm".to_string(),
                cols: 100,
                rows: 40,
            }
        ));

        router.start_shell(1, sink.clone()).unwrap();
        router.data(1, b"stty size; exit\n").await;

        timeout(Duration::from_secs(10), sink.wait_closed())
            .await
            .expect("channel never closed");
        let output = String::from_utf8_lossy(&sink.stdout()).to_string();
        assert!(output.contains("40 100"), "unexpected output: {}", output);
    }

    #[tokio::test]
    async fn test_window_change_requires_running_shell() {
        let mut router = router();
        let sink = RecordingSink::new();

        router.open_channel(1);
        assert!(!router.window_change(1, 120, 50).await);

        router.open_channel(2);
        router.start_exec(2, "sleep 5", sink.clone()).unwrap();
        assert!(!router.window_change(2, 120, 50).await);

        router.open_channel(3);
        router.start_shell(3, sink.clone()).unwrap();
        assert!(router.window_change(3, 120, 50).await);

        router.close_channel(2).await;
        router.close_channel(3).await;
    }

    #[test]
    fn test_unsupported_sub_requests_rejected() {
        let mut router = router();
        router.open_channel(1);

        assert!(router.env_request(1, "LANG", "C"));
        assert!(!router.env_request(2, "LANG", "C"));
        assert!(!router.subsystem_request("sftp"));
        assert!(!router.agent_request());
    }

    #[tokio::test]
    async fn test_close_unknown_channel_is_harmless() {
        let mut router = router();
        router.close_channel(42).await;
        router.eof(42).await;
        router.data(42, b"ignored").await;
    }
}
