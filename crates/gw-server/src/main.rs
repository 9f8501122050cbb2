//! gangway SSH server daemon
//!
//! Accepts publickey-authenticated SSH connections and serves exec
//! channels, interactive shells, and TCP port forwarding.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gw_core::config::{self, ServerConfig};
use gw_server::auth::{Authenticator, AuthorizedKeySet};
use gw_server::server::{load_or_generate_host_key, SshServer};

#[derive(Parser)]
#[command(name = "gw-server")]
#[command(about = "gangway SSH server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("gangway server starting...");

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                ServerConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            ServerConfig::default()
        }
    };

    // Override bind address if specified
    let bind_addr = args.bind.unwrap_or_else(|| config.bind_address.clone());

    // Load or generate host key
    let host_key = load_or_generate_host_key(&config.host_key_path).await?;
    tracing::info!(
        "Host key fingerprint: {}",
        host_key.clone_public_key().unwrap().fingerprint()
    );

    // Load authorized keys
    let keys = if config.authorized_keys_paths.is_empty() {
        tracing::warn!("No authorized keys files configured");
        AuthorizedKeySet::new()
    } else {
        AuthorizedKeySet::load_from_files(&config.authorized_keys_paths)?
    };

    if keys.is_empty() {
        tracing::warn!("No valid authorized keys found - all connections will be rejected");
    } else {
        tracing::info!("Loaded {} authorized keys", keys.len());
    }

    let authenticator = Arc::new(Authenticator::new(keys));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    // Create and run SSH server
    let server = SshServer::new(host_key, authenticator, config.shell.clone(), cancel.clone());

    tracing::info!("Starting SSH server on {}", bind_addr);
    server.run(&bind_addr).await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
