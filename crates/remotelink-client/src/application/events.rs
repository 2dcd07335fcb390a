//! Event sink through which a [`PeerClient`](crate::PeerClient) reports to
//! its embedder.

use remotelink_core::Envelope;

use crate::application::error::ClientError;
use crate::domain::DisconnectReason;

/// Lifecycle and traffic callbacks for a peer client.
///
/// Every method has a no-op default.  Methods are called from client tasks and
/// must not block.
pub trait ClientEvents: Send + Sync {
    /// A link is up.  `peer_name` is the server's advertised display name.
    fn on_connected(&self, _peer_name: Option<&str>) {}

    /// A link went down, either on request or unexpectedly.
    fn on_disconnected(&self, _reason: &DisconnectReason) {}

    /// Reconnect attempt `attempt` of `max` is about to start.
    fn on_reconnecting(&self, _attempt: u32, _max: u32) {}

    fn on_reconnect_succeeded(&self, _attempt: u32) {}

    /// Every attempt failed; the client is now disconnected.
    fn on_reconnect_failed(&self, _attempts: u32) {}

    fn on_message(&self, _envelope: &Envelope) {}

    fn on_error(&self, _error: &ClientError) {}
}

/// A sink that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl ClientEvents for NoopEvents {}
