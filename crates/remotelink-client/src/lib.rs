//! remotelink-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! A [`PeerClient`] connects to a RemoteLink server, performs the key
//! exchange as initiator, and then exchanges encrypted envelopes.  Envelopes
//! sent while offline wait in a bounded queue; an unexpected link loss
//! triggers automatic reconnection when enabled.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::error::ClientError;
pub use application::events::{ClientEvents, NoopEvents};
pub use domain::{ClientConfig, ClientConfigBuilder, ConnectionState, DisconnectReason};
pub use infrastructure::network::PeerClient;
