//! Domain types for the client: configuration and connection lifecycle.
//!
//! No I/O lives here.

pub mod config;
pub mod state;

pub use config::{backoff_delay, ClientConfig, ClientConfigBuilder, DEFAULT_RECONNECT_DELAYS};
pub use state::{ConnectionState, DisconnectReason};
