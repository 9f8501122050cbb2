//! SSH server listener
//!
//! Accepts incoming connections and drives one handler per client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::server::handler::{ConnectionController, ServerConfig};

/// SSH server that listens for incoming connections
pub struct SshServer {
    /// Server configuration
    config: ServerConfig,
    /// Shared authentication policy
    authenticator: Arc<Authenticator>,
    /// Shell used by exec and shell channels
    shell: String,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl SshServer {
    /// Create a new SSH server
    pub fn new(
        host_key: KeyPair,
        authenticator: Arc<Authenticator>,
        shell: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config: ServerConfig::new(host_key),
            authenticator,
            shell,
            cancel,
        }
    }

    /// Run the SSH server
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        let local_addr = listener.local_addr()?;
        tracing::info!("SSH server listening on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a new incoming connection
    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        tracing::info!("New connection from {}", peer_addr);

        let config = Arc::clone(&self.config.ssh_config);
        let handler = ConnectionController::new(
            Arc::clone(&self.authenticator),
            self.shell.clone(),
            peer_addr,
        );
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            // run_stream performs the handshake; the returned future
            // drives the established session until it ends.
            let session = match russh::server::run_stream(config, socket, handler).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
                    return;
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connection with {} cancelled", peer_addr);
                }
                result = session => {
                    match result {
                        Ok(_) => tracing::info!("Connection from {} closed", peer_addr),
                        Err(e) => {
                            tracing::warn!("Connection from {} closed with error: {}", peer_addr, e);
                        }
                    }
                }
            }
        });
    }
}

/// Load the host key, generating and persisting one if missing
pub async fn load_or_generate_host_key(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        tracing::info!("Loading host key from {:?}", path);
        let key = russh_keys::load_secret_key(path, None)
            .with_context(|| format!("Failed to load host key from {:?}", path))?;
        return Ok(key);
    }

    tracing::info!("Generating new host key at {:?}", path);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let key = KeyPair::generate_ed25519()
        .ok_or_else(|| anyhow::anyhow!("Failed to generate Ed25519 key"))?;

    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).context("Failed to encode host key")?;
    tokio::fs::write(path, &pem)
        .await
        .with_context(|| format!("Failed to write host key to {:?}", path))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .with_context(|| format!("Failed to set permissions on {:?}", path))?;
    }

    Ok(key)
}
