//! RemoteLink server entry point.
//!
//! Loads configuration, applies command-line overrides, and runs the
//! [`SessionManager`] until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! remotelink-server [OPTIONS]
//!
//! Options:
//!   --config       <PATH>   Config file [default: platform config dir]
//!   --bind         <IP>     Address to listen on
//!   --port         <PORT>   TCP port to listen on
//!   --max-clients  <N>      Maximum concurrent sessions
//!   --name         <NAME>   Display name sent to peers
//!   --log-level    <LEVEL>  Fallback log level when RUST_LOG is unset
//!   --save-config           Write the effective configuration and exit
//! ```
//!
//! Options override the file; the file overrides built-in defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use remotelink_core::Envelope;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remotelink_server::infrastructure::storage::config::default_config_path;
use remotelink_server::infrastructure::storage::{load_config, save_config};
use remotelink_server::{CloseReason, ConnectionId, ServerConfig, SessionEvents, SessionManager};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// RemoteLink encrypted messaging server.
#[derive(Debug, Parser)]
#[command(
    name = "remotelink-server",
    about = "Encrypted envelope server for RemoteLink peers",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "REMOTELINK_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the listener to.
    #[arg(long, env = "REMOTELINK_BIND")]
    bind: Option<String>,

    /// TCP port to listen on.  `0` picks an ephemeral port.
    #[arg(long, env = "REMOTELINK_PORT")]
    port: Option<u16>,

    /// Maximum concurrent sessions, handshaking ones included.
    #[arg(long)]
    max_clients: Option<usize>,

    /// Display name advertised during the handshake.
    #[arg(long)]
    name: Option<String>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(default_config_path)
    }

    /// Loads the config file and layers the command-line overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, if the resulting
    /// bind address is invalid, or if `max_clients` is zero.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match self.config_path() {
            Some(path) => load_config(&path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.network.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(max_clients) = self.max_clients {
            config.network.max_clients = max_clients;
        }
        if let Some(name) = self.name {
            config.server.name = name;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }

        config.bind_addr().with_context(|| {
            format!(
                "invalid bind address: '{}:{}'",
                config.network.bind_address, config.network.port
            )
        })?;
        anyhow::ensure!(config.network.max_clients > 0, "max_clients must be at least 1");
        Ok(config)
    }
}

// ── Event logging ─────────────────────────────────────────────────────────────

/// Reports session activity through `tracing`.
struct LoggingEvents;

impl SessionEvents for LoggingEvents {
    fn on_connected(&self, id: ConnectionId, peer_addr: SocketAddr, display_name: Option<&str>) {
        info!(%id, %peer_addr, "peer connected: {}", display_name.unwrap_or("unnamed"));
    }

    fn on_disconnected(&self, id: ConnectionId, reason: &CloseReason) {
        info!(%id, "peer disconnected: {reason}");
    }

    fn on_message(&self, id: ConnectionId, envelope: &Envelope) {
        tracing::trace!(%id, envelope_id = %envelope.id(), "message");
    }

    fn on_data(&self, id: ConnectionId, key: &str, bytes: &[u8]) {
        info!(%id, "received {} bytes for '{key}'", bytes.len());
    }

    fn on_error(&self, id: ConnectionId, error: &remotelink_core::ChannelError) {
        warn!(%id, "session error: {error}");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let save_path = cli.save_config.then(|| cli.config_path()).flatten();
    let save_requested = cli.save_config;
    let config = cli.into_server_config()?;

    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    if save_requested {
        let path = save_path.context("no config path available on this platform")?;
        save_config(&path, &config)
            .with_context(|| format!("writing config to {}", path.display()))?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    info!("RemoteLink server '{}' starting", config.server.name);

    let manager = SessionManager::new(config, Arc::new(LoggingEvents));
    let addr = manager.start().await.context("starting server")?;
    info!("ready on {addr}.  Press Ctrl-C to exit.");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!("failed to listen for Ctrl-C: {e}"),
    }

    manager.stop().await;
    info!("RemoteLink server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
