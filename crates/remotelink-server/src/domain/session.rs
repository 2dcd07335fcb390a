//! Session identity and lifecycle.
//!
//! A session moves strictly forward:
//!
//! ```text
//! Accepted  ──►  HandshakePending  ──►  Established  ──►  Closed
//!                       │                                   ▲
//!                       └───────────────────────────────────┘
//! ```
//!
//! Handshake failure (bad frame, wrong payload, timeout) skips straight to
//! `Closed`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Server-assigned identifier, unique for the lifetime of a `SessionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lock-free monotonic source of [`ConnectionId`]s, starting at 1.
#[derive(Debug)]
pub struct ConnectionIdGenerator {
    next: AtomicU64,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream accepted, nothing exchanged yet.
    Accepted,
    /// Waiting for the peer's key exchange.
    HandshakePending,
    /// Key agreed; application envelopes flow.
    Established,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Accepted, HandshakePending)
                | (Accepted, Closed)
                | (HandshakePending, Established)
                | (HandshakePending, Closed)
                | (Established, Closed)
        )
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer ended the stream.
    PeerClosed,
    /// The peer sent the `disconnect` command.
    Requested,
    /// The server closed the session (`disconnect`, `stop`, or a failed send).
    ServerClosed,
    /// The handshake or receive loop failed.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed the connection"),
            CloseReason::Requested => f.write_str("peer requested disconnect"),
            CloseReason::ServerClosed => f.write_str("closed by server"),
            CloseReason::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    /// Name the peer advertised during the handshake, if any.
    pub display_name: Option<String>,
    pub state: SessionState,
    pub accepted_at: SystemTime,
}
