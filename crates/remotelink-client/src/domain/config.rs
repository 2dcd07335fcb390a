//! Client configuration and the reconnect backoff schedule.
//!
//! A [`ClientConfig`] is built once through [`ClientConfig::builder`] and never
//! changes afterwards; the [`PeerClient`](crate::PeerClient) owns it for its
//! whole life.

use std::time::Duration;

use remotelink_core::{ChannelConfig, DEFAULT_MAX_FRAME_LEN};

/// Default reconnect schedule: 1 s, 2 s, 5 s, 10 s, then 30 s for every later
/// attempt.
pub const DEFAULT_RECONNECT_DELAYS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Immutable client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    address: String,
    port: u16,
    auto_reconnect: bool,
    max_reconnect_attempts: u32,
    reconnect_delays: Vec<Duration>,
    queue_capacity: usize,
    message_expiry: Option<Duration>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7878,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            reconnect_delays: DEFAULT_RECONNECT_DELAYS.to_vec(),
            queue_capacity: 100,
            message_expiry: Some(Duration::from_secs(60)),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            heartbeat_interval: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `address:port`, for logging and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    pub fn reconnect_delays(&self) -> &[Duration] {
        &self.reconnect_delays
    }

    /// Zero disables queueing: `send` while not connected fails immediately.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// `None` keeps queued envelopes until they are flushed.
    pub fn message_expiry(&self) -> Option<Duration> {
        self.message_expiry
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            max_frame_len: self.max_frame_len,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(&self.reconnect_delays, attempt)
    }
}

/// Returns `delays[min(attempt - 1, len - 1)]`, or zero for an empty schedule.
///
/// Attempt numbers start at 1; attempt 0 is treated as attempt 1.
pub fn backoff_delay(delays: &[Duration], attempt: u32) -> Duration {
    let Some(last) = delays.len().checked_sub(1) else {
        return Duration::ZERO;
    };
    let index = (attempt.saturating_sub(1) as usize).min(last);
    delays[index]
}

/// Builder for [`ClientConfig`].  Unset fields keep their defaults.
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn reconnect_delays(mut self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.config.reconnect_delays = delays.into_iter().collect();
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn message_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.config.message_expiry = expiry;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    pub fn max_frame_len(mut self, max: usize) -> Self {
        self.config.max_frame_len = max;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
