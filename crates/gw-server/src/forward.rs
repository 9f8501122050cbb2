//! Port forwarding
//!
//! Remote forwards (`tcpip-forward`) bind a server-side listener and
//! open a forwarded channel back to the client for every inbound
//! connection. Direct forwards (`direct-tcpip`) connect outward on the
//! client's behalf. Both relay bytes until either side closes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::Handle;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use gw_core::error::ForwardError;

/// Streams usable as one side of a forwarding relay
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for boxed forward streams
pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// Capability to open a forwarded channel toward the client
#[async_trait]
pub trait ForwardTarget: Send + Sync + 'static {
    async fn open_forwarded(
        &self,
        bind_address: &str,
        bind_port: u32,
        peer_address: &str,
        peer_port: u32,
    ) -> anyhow::Result<ForwardStream>;
}

/// Production [`ForwardTarget`] over a russh session handle
pub struct ClientForwardTarget {
    handle: Handle,
}

impl ClientForwardTarget {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl ForwardTarget for ClientForwardTarget {
    async fn open_forwarded(
        &self,
        bind_address: &str,
        bind_port: u32,
        peer_address: &str,
        peer_port: u32,
    ) -> anyhow::Result<ForwardStream> {
        let channel = self
            .handle
            .channel_open_forwarded_tcpip(bind_address, bind_port, peer_address, peer_port)
            .await?;
        Ok(Box::new(channel.into_stream()))
    }
}

/// Owns the remote-forward listeners of one connection.
///
/// Listeners are keyed by (bind address, bound port) and torn down on
/// explicit cancellation or when the manager is dropped with its
/// connection.
#[derive(Default)]
pub struct ForwardingManager {
    listeners: HashMap<(String, u32), JoinHandle<()>>,
}

impl ForwardingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a listener for a `tcpip-forward` request.
    ///
    /// Port 0 requests an OS-assigned ephemeral port; the actually
    /// bound port is returned either way and must be reported back to
    /// the requester.
    pub async fn start_remote_forward(
        &mut self,
        target: Arc<dyn ForwardTarget>,
        address: &str,
        port: u32,
    ) -> Result<u32, ForwardError> {
        let bind_port = u16::try_from(port).map_err(|_| ForwardError::InvalidPort(port))?;
        // An empty bind address means all interfaces
        let bind_host = if address.is_empty() { "0.0.0.0" } else { address };

        let listener = TcpListener::bind((bind_host, bind_port))
            .await
            .map_err(|source| ForwardError::Bind {
                address: bind_host.to_string(),
                port,
                source,
            })?;
        let actual = listener
            .local_addr()
            .map_err(|source| ForwardError::Bind {
                address: bind_host.to_string(),
                port,
                source,
            })?
            .port() as u32;

        tracing::info!("Remote forward listening on {}:{}", bind_host, actual);

        let bind_address = address.to_string();
        let task = tokio::spawn(accept_loop(listener, target, bind_address.clone(), actual));
        self.listeners.insert((bind_address, actual), task);
        Ok(actual)
    }

    /// Tear down the listener named by a `cancel-tcpip-forward`
    /// request. Returns false if no such listener exists.
    pub fn cancel_remote_forward(&mut self, address: &str, port: u32) -> bool {
        match self.listeners.remove(&(address.to_string(), port)) {
            Some(task) => {
                task.abort();
                tracing::info!("Cancelled remote forward on {}:{}", address, port);
                true
            }
            None => false,
        }
    }

    /// Abort all listeners
    pub fn shutdown(&mut self) {
        for ((address, port), task) in self.listeners.drain() {
            tracing::debug!("Closing remote forward listener {}:{}", address, port);
            task.abort();
        }
    }
}

impl Drop for ForwardingManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept inbound connections and bridge each to a forwarded channel
async fn accept_loop(
    listener: TcpListener,
    target: Arc<dyn ForwardTarget>,
    bind_address: String,
    bind_port: u32,
) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(
                    "Accept failed on forward listener {}:{}: {}",
                    bind_address,
                    bind_port,
                    e
                );
                break;
            }
        };

        let target = Arc::clone(&target);
        let bind_address = bind_address.clone();
        tokio::spawn(async move {
            let peer_address = peer.ip().to_string();
            let peer_port = peer.port() as u32;

            match target
                .open_forwarded(&bind_address, bind_port, &peer_address, peer_port)
                .await
            {
                Ok(mut channel) => {
                    let mut socket = socket;
                    let _ = tokio::io::copy_bidirectional(&mut socket, &mut channel).await;
                }
                Err(e) => {
                    // Dropping the socket closes the inbound connection
                    tracing::warn!(
                        "Failed to open forwarded channel for {}:{}: {}",
                        peer_address,
                        peer_port,
                        e
                    );
                }
            }
        });
    }
}

/// Connect to the destination of a `direct-tcpip` request and relay
/// until either side closes.
pub async fn relay_direct<S>(mut channel: S, host: &str, port: u32) -> Result<(), ForwardError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let dest_port = u16::try_from(port).map_err(|_| ForwardError::InvalidPort(port))?;
    let mut stream =
        TcpStream::connect((host, dest_port))
            .await
            .map_err(|source| ForwardError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;

    let _ = tokio::io::copy_bidirectional(&mut channel, &mut stream).await;
    Ok(())
}
