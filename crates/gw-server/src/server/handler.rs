//! SSH connection handler
//!
//! One [`ConnectionController`] per client connection. It evaluates
//! authentication attempts, routes session sub-requests through the
//! [`SessionRouter`], and owns the connection's forwarding state.
//! Dropping the controller tears down everything the connection owns:
//! adapter children die when their control senders drop, and the
//! forwarding manager aborts its listeners.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, MethodSet, Pty};
use russh_keys::key::PublicKey;

use crate::auth::{AuthDecision, Authenticator};
use crate::channel::SessionChannelSink;
use crate::forward::{self, ClientForwardTarget, ForwardingManager};
use crate::session::{PtyInfo, SessionRouter};

/// Handler for a single SSH client connection
pub struct ConnectionController {
    authenticator: Arc<Authenticator>,
    /// Peer address of the connecting client
    peer_addr: SocketAddr,
    /// Session channels and their adapters
    router: SessionRouter,
    /// Remote-forward listeners owned by this connection
    forwards: ForwardingManager,
}

impl ConnectionController {
    pub fn new(authenticator: Arc<Authenticator>, shell: String, peer_addr: SocketAddr) -> Self {
        Self {
            authenticator,
            peer_addr,
            router: SessionRouter::new(shell),
            forwards: ForwardingManager::new(),
        }
    }

    fn sink_for(&self, session: &mut Session, channel: ChannelId) -> Arc<SessionChannelSink> {
        Arc::new(SessionChannelSink::new(session.handle(), channel))
    }

    fn reject_with_publickey() -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(MethodSet::PUBLICKEY),
        }
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        tracing::debug!("Connection from {} torn down", self.peer_addr);
    }
}

#[async_trait]
impl Handler for ConnectionController {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let fingerprint = public_key.fingerprint();

        match self.authenticator.evaluate_publickey(public_key) {
            AuthDecision::Accept => {
                tracing::info!(
                    "Accepted key {} for user {} from {}",
                    fingerprint,
                    user,
                    self.peer_addr
                );
                Ok(Auth::Accept)
            }
            AuthDecision::Reject => {
                tracing::info!(
                    "Rejected {} key {} for user {} from {}",
                    public_key.name(),
                    fingerprint,
                    user,
                    self.peer_addr
                );
                Ok(Self::reject_with_publickey())
            }
        }
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        tracing::info!(
            "Rejected password auth for user {} from {}",
            user,
            self.peer_addr
        );
        Ok(Self::reject_with_publickey())
    }

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        tracing::debug!("Rejected none auth for user {} from {}", user, self.peer_addr);
        Ok(Self::reject_with_publickey())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Session channel opened: {:?}", channel.id());
        self.router.open_channel(channel.id());
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).to_string();
        tracing::info!("exec on {:?}: {}", channel, command);

        let sink = self.sink_for(session, channel);
        match self.router.start_exec(channel, &command, sink) {
            Ok(()) => session.channel_success(channel),
            Err(e) => {
                tracing::warn!("exec failed on {:?}: {}", channel, e);
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            "pty request on {:?}: {} {}x{}",
            channel,
            term,
            col_width,
            row_height
        );

        let info = PtyInfo {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
        };
        if self.router.record_pty(channel, info) {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::info!("shell request on {:?}", channel);

        let sink = self.sink_for(session, channel);
        match self.router.start_shell(channel, sink) {
            Ok(()) => session.channel_success(channel),
            Err(e) => {
                tracing::warn!("shell failed on {:?}: {}", channel, e);
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.router.window_change(channel, col_width, row_height).await {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.router.env_request(channel, variable_name, variable_value) {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.router.subsystem_request(name) {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }

    async fn agent_request(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Rejecting agent forwarding on {:?}", channel);
        Ok(self.router.agent_request())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.router.data(channel, data).await;
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel EOF: {:?}", channel);
        self.router.eof(channel).await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel closed: {:?}", channel);
        self.router.close_channel(channel).await;
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::info!(
            "tcpip-forward request for {}:{} from {}",
            address,
            port,
            self.peer_addr
        );

        let target = Arc::new(ClientForwardTarget::new(session.handle()));
        match self.forwards.start_remote_forward(target, address, *port).await {
            Ok(actual) => {
                *port = actual;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("tcpip-forward for {} failed: {}", address, e);
                Ok(false)
            }
        }
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::info!(
            "cancel-tcpip-forward for {}:{} from {}",
            address,
            port,
            self.peer_addr
        );
        Ok(self.forwards.cancel_remote_forward(address, port))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::info!(
            "direct-tcpip from {} to {}:{} (origin {}:{})",
            self.peer_addr,
            host_to_connect,
            port_to_connect,
            originator_address,
            originator_port
        );

        let handle = session.handle();
        let id = channel.id();
        let host = host_to_connect.to_string();

        tokio::spawn(async move {
            let stream = channel.into_stream();
            if let Err(e) = forward::relay_direct(stream, &host, port_to_connect).await {
                tracing::debug!("direct-tcpip to {}:{} ended: {}", host, port_to_connect, e);
            }
            let _ = handle.close(id).await;
        });

        Ok(true)
    }
}

/// Configuration for the SSH server
#[derive(Clone)]
pub struct ServerConfig {
    /// russh server configuration
    pub ssh_config: Arc<russh::server::Config>,
}

impl ServerConfig {
    /// Create a new server configuration with the given host key
    pub fn new(host_key: russh_keys::key::KeyPair) -> Self {
        let mut config = russh::server::Config::default();
        config.keys.push(host_key);
        config.methods = MethodSet::PUBLICKEY;
        config.auth_rejection_time = std::time::Duration::from_secs(1);
        config.auth_rejection_time_initial = Some(std::time::Duration::from_secs(0));

        Self {
            ssh_config: Arc::new(config),
        }
    }
}
