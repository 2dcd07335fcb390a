//! Network infrastructure for the client.
//!
//! - **`peer_client`**: TCP connect, initiator handshake, the reader and
//!   heartbeat tasks, the outbound queue flush, and the reconnect loop.

pub mod peer_client;

pub use peer_client::PeerClient;
