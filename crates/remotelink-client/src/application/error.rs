//! Error type for peer client operations.

use remotelink_core::ChannelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The TCP connection could not be opened.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection was not established within `connect_timeout`.
    #[error("connecting to {addr} timed out")]
    ConnectTimeout { addr: String },

    /// Handshake, send, or receive failure on the secure channel.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// `send` while not connected and queueing is disabled.
    #[error("not connected")]
    NotConnected,

    /// The outbound queue already holds `capacity` envelopes.
    #[error("outbound queue is full ({capacity} envelopes)")]
    QueueFull { capacity: usize },

    /// `connect` while already connected, connecting, or reconnecting.
    #[error("client is already connected")]
    AlreadyConnected,
}
