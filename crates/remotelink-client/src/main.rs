//! RemoteLink client entry point.
//!
//! Connects to a server and turns stdin lines into envelopes:
//!
//! ```text
//! hello there               -> Text
//! /cmd echo message=hi      -> Command { name: "echo", params: {message: hi} }
//! /data notes some bytes    -> Data { key: "notes", bytes: b"some bytes" }
//! /quit                     -> disconnect and exit
//! ```
//!
//! Replies and server pushes are logged through `tracing`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use remotelink_core::{Envelope, Payload};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remotelink_client::{
    ClientConfig, ClientError, ClientEvents, DisconnectReason, PeerClient,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// RemoteLink interactive client.
#[derive(Debug, Parser)]
#[command(
    name = "remotelink-client",
    about = "Interactive client for a RemoteLink server",
    version
)]
struct Cli {
    /// Server hostname or IP address.
    #[arg(long, default_value = "127.0.0.1", env = "REMOTELINK_SERVER_HOST")]
    host: String,

    /// Server TCP port.
    #[arg(long, default_value_t = 7878, env = "REMOTELINK_SERVER_PORT")]
    port: u16,

    /// Display name sent during the handshake.
    #[arg(long, default_value = "remotelink-client", env = "REMOTELINK_NAME")]
    name: String,

    /// Disable automatic reconnection after an unexpected disconnect.
    #[arg(long)]
    no_reconnect: bool,

    /// Reconnect attempts before giving up.
    #[arg(long, default_value_t = 5)]
    max_reconnect_attempts: u32,

    /// Envelopes held while offline; 0 disables queueing.
    #[arg(long, default_value_t = 100)]
    queue_capacity: usize,

    /// Heartbeat interval in seconds; 0 disables heartbeats.
    #[arg(long, default_value_t = 0)]
    heartbeat_secs: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`ClientConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty or the port is zero.
    fn into_client_config(self) -> anyhow::Result<ClientConfig> {
        anyhow::ensure!(!self.host.trim().is_empty(), "server host must not be empty");
        anyhow::ensure!(self.port != 0, "server port must not be 0");

        let heartbeat = (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs));
        Ok(ClientConfig::builder()
            .address(self.host)
            .port(self.port)
            .auto_reconnect(!self.no_reconnect)
            .max_reconnect_attempts(self.max_reconnect_attempts)
            .queue_capacity(self.queue_capacity)
            .heartbeat_interval(heartbeat)
            .build())
    }
}

// ── Console input ─────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(Envelope),
    Quit,
    Skip,
}

/// Interprets one console line.
fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Skip);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Input::Send(Envelope::text(line)));
    };

    let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));
    match verb {
        "quit" | "exit" => Ok(Input::Quit),
        "cmd" => {
            let mut words = args.split_whitespace();
            let name = words.next().ok_or("usage: /cmd <verb> [key=value ...]")?;
            let params = words
                .map(|pair| {
                    pair.split_once('=')
                        .ok_or_else(|| format!("expected key=value, got '{pair}'"))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Input::Send(Envelope::command(name, params)))
        }
        "data" => {
            let (key, body) = args.trim().split_once(' ').unwrap_or((args.trim(), ""));
            if key.is_empty() {
                return Err("usage: /data <key> <text>".to_string());
            }
            Ok(Input::Send(Envelope::data(key, body.as_bytes().to_vec())))
        }
        other => Err(format!("unknown console command '/{other}'")),
    }
}

// ── Event logging ─────────────────────────────────────────────────────────────

struct LoggingEvents;

impl ClientEvents for LoggingEvents {
    fn on_connected(&self, peer_name: Option<&str>) {
        info!("connected to {}", peer_name.unwrap_or("server"));
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        info!("disconnected: {reason}");
    }

    fn on_reconnecting(&self, attempt: u32, max: u32) {
        info!("reconnecting ({attempt}/{max})");
    }

    fn on_reconnect_succeeded(&self, attempt: u32) {
        info!("reconnected after {attempt} attempt(s)");
    }

    fn on_reconnect_failed(&self, attempts: u32) {
        warn!("gave up reconnecting after {attempts} attempt(s)");
    }

    fn on_message(&self, envelope: &Envelope) {
        match envelope.payload() {
            Payload::Response {
                success, message, ..
            } => info!("[{}] {message}", if *success { "ok" } else { "failed" }),
            Payload::Text { content } => info!("server says: {content}"),
            Payload::Heartbeat { .. } => tracing::debug!("heartbeat"),
            other => info!("received {:?}", other.kind()),
        }
    }

    fn on_error(&self, error: &ClientError) {
        warn!("client error: {error}");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let display_name = cli.name.clone();
    let config = cli.into_client_config()?;
    let endpoint = config.endpoint();

    let client = PeerClient::new(config, Arc::new(LoggingEvents));
    client
        .connect(&display_name)
        .await
        .with_context(|| format!("connecting to {endpoint}"))?;
    info!("type a message, /cmd <verb> [k=v ...], /data <key> <text>, or /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Ok(Input::Send(envelope)) => {
                if let Err(e) = client.send(&envelope).await {
                    warn!("send failed: {e}");
                }
            }
            Ok(Input::Quit) => break,
            Ok(Input::Skip) => {}
            Err(usage) => warn!("{usage}"),
        }
    }

    client.disconnect().await;
    info!("RemoteLink client stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        // Arrange / Act
        let cli = Cli::parse_from(["remotelink-client"]);

        // Assert
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 7878);
        assert!(!cli.no_reconnect);
        assert_eq!(cli.heartbeat_secs, 0);
    }

    #[test]
    fn test_into_client_config_applies_flags() {
        let cli = Cli::parse_from([
            "remotelink-client",
            "--host",
            "10.1.2.3",
            "--port",
            "9001",
            "--no-reconnect",
            "--queue-capacity",
            "0",
            "--heartbeat-secs",
            "15",
        ]);

        let config = cli.into_client_config().unwrap();

        assert_eq!(config.endpoint(), "10.1.2.3:9001");
        assert!(!config.auto_reconnect());
        assert_eq!(config.queue_capacity(), 0);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_into_client_config_rejects_port_zero() {
        let cli = Cli::parse_from(["remotelink-client", "--port", "0"]);
        assert!(cli.into_client_config().is_err());
    }

    #[test]
    fn test_parse_plain_line_is_text() {
        match parse_input("  hello world ").unwrap() {
            Input::Send(env) => assert_eq!(
                env.payload(),
                &Payload::Text {
                    content: "hello world".into()
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_cmd_with_params() {
        match parse_input("/cmd echo message=hi").unwrap() {
            Input::Send(env) => match env.into_payload() {
                Payload::Command { name, params } => {
                    assert_eq!(name, "echo");
                    assert_eq!(params.get("message").map(String::as_str), Some("hi"));
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_cmd_rejects_bare_param() {
        assert!(parse_input("/cmd echo message").is_err());
        assert!(parse_input("/cmd").is_err());
    }

    #[test]
    fn test_parse_data_line() {
        match parse_input("/data notes two words").unwrap() {
            Input::Send(env) => assert_eq!(
                env.payload(),
                &Payload::Data {
                    key: "notes".into(),
                    bytes: b"two words".to_vec()
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_quit_empty_and_unknown() {
        assert_eq!(parse_input("/quit").unwrap(), Input::Quit);
        assert_eq!(parse_input("   ").unwrap(), Input::Skip);
        assert!(parse_input("/bogus").is_err());
    }
}
