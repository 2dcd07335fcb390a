//! TOML-based configuration for the server.
//!
//! The default location is platform-dependent:
//! - Windows:  `%APPDATA%\RemoteLink\server.toml`
//! - Linux:    `~/.config/remotelink/server.toml`
//! - macOS:    `~/Library/Application Support/RemoteLink/server.toml`
//!
//! Example:
//!
//! ```toml
//! [server]
//! name = "living-room"
//! log_level = "debug"
//!
//! [network]
//! bind_address = "0.0.0.0"
//! port = 7878
//! max_clients = 10
//! send_timeout_ms = 10000
//! ```
//!
//! Every field has a `#[serde(default = ...)]`, so partial files and a missing
//! file both yield a usable configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use remotelink_core::{ChannelConfig, DEFAULT_MAX_FRAME_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// `bind_address:port` is not a socket address.
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub network: NetworkSection,
}

/// Identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSection {
    /// Display name advertised to peers during the handshake.
    #[serde(default = "default_name")]
    pub name: String,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Listener and session limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSection {
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port; `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent sessions, handshaking ones included.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Largest frame body accepted, in bytes.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Seconds a peer has to finish the key exchange.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Milliseconds a single outbound frame may stay blocked before the
    /// session is closed as stalled.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_name() -> String {
    "remotelink-server".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7878
}
fn default_max_clients() -> usize {
    10
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_send_timeout_ms() -> u64 {
    10_000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_clients: default_max_clients(),
            max_frame_len: default_max_frame_len(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Parses `bind_address:port`.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.network.bind_address, self.network.port);
        raw.parse().map_err(|_| ConfigError::InvalidAddress(raw))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.network.handshake_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.network.send_timeout_ms)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_frame_len: self.network.max_frame_len,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Platform default path for the server config file, if one can be resolved.
pub fn default_config_path() -> Option<PathBuf> {
    platform_config_dir().map(|dir| dir.join("server.toml"))
}

/// Loads a [`ServerConfig`] from `path`, returning defaults if the file does not
/// exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("RemoteLink"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("remotelink"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("RemoteLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("remotelink_{tag}_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn test_default_config_values() {
        // Arrange / Act
        let cfg = ServerConfig::default();

        // Assert
        assert_eq!(cfg.network.port, 7878);
        assert_eq!(cfg.network.max_clients, 10);
        assert_eq!(cfg.network.max_frame_len, 10_000_000);
        assert_eq!(cfg.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.send_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.server.log_level, "info");
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let cfg: ServerConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn test_partial_network_section_overrides_only_given_fields() {
        // Arrange
        let toml_str = r#"
[network]
port = 9999
max_clients = 2
"#;

        // Act
        let cfg: ServerConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.network.port, 9999);
        assert_eq!(cfg.network.max_clients, 2);
        assert_eq!(cfg.network.bind_address, "0.0.0.0");
        assert_eq!(cfg.server.name, "remotelink-server");
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let result: Result<ServerConfig, _> = toml::from_str("[[[ nope");
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_addr_parses_ip_and_port() {
        let mut cfg = ServerConfig::default();
        cfg.network.bind_address = "127.0.0.1".into();
        cfg.network.port = 4000;
        assert_eq!(cfg.bind_addr().unwrap(), "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_bind_addr_rejects_hostname() {
        let mut cfg = ServerConfig::default();
        cfg.network.bind_address = "not.an.ip".into();
        assert!(matches!(cfg.bind_addr(), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_channel_config_carries_frame_ceiling() {
        let mut cfg = ServerConfig::default();
        cfg.network.max_frame_len = 4096;
        assert_eq!(cfg.channel_config().max_frame_len, 4096);
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/server.toml");
        assert_eq!(load_config(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        // Arrange
        let dir = temp_dir("cfg");
        let path = dir.join("nested").join("server.toml");
        let mut cfg = ServerConfig::default();
        cfg.network.port = 12345;
        cfg.server.name = "hub".into();
        cfg.server.log_level = "debug".into();

        // Act
        save_config(&path, &cfg).expect("save");
        let loaded = load_config(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_config_path_ends_with_server_toml() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("server.toml"), "got {path:?}");
        }
    }
}
