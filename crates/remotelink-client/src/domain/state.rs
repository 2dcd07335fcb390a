//! Connection lifecycle types.

use std::fmt;

/// Where a [`PeerClient`](crate::PeerClient) is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The link dropped unexpectedly and the reconnect loop is running.
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Why a link ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller invoked `disconnect()`.
    Requested,
    /// The server ended the stream cleanly.
    PeerClosed,
    /// The link failed.
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => write!(f, "disconnect requested"),
            DisconnectReason::PeerClosed => write!(f, "server closed the connection"),
            DisconnectReason::Error(e) => write!(f, "connection failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(ConnectionState::Connected.is_connected());
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(DisconnectReason::Requested.to_string(), "disconnect requested");
        assert_eq!(
            DisconnectReason::Error("reset".into()).to_string(),
            "connection failed: reset"
        );
    }
}
