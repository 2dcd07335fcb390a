//! Event sink through which the session manager reports to its embedder.

use std::net::SocketAddr;

use remotelink_core::{ChannelError, Envelope};

use crate::domain::{CloseReason, ConnectionId};

/// Lifecycle and traffic callbacks for server sessions.
///
/// Every method has a no-op default; implement only what you need.  Methods
/// are called from session tasks and must not block.
pub trait SessionEvents: Send + Sync {
    /// The handshake finished and the session is established.
    fn on_connected(&self, _id: ConnectionId, _peer_addr: SocketAddr, _display_name: Option<&str>) {}

    /// An established session ended.
    fn on_disconnected(&self, _id: ConnectionId, _reason: &CloseReason) {}

    /// An envelope arrived on an established session, before dispatch.
    fn on_message(&self, _id: ConnectionId, _envelope: &Envelope) {}

    /// A `Data` payload arrived.
    fn on_data(&self, _id: ConnectionId, _key: &str, _bytes: &[u8]) {}

    /// A session hit an error (handshake failure or receive-loop failure).
    fn on_error(&self, _id: ConnectionId, _error: &ChannelError) {}
}

/// A sink that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl SessionEvents for NoopEvents {}
