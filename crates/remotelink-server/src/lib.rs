//! remotelink-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::events::{NoopEvents, SessionEvents};
pub use domain::{CloseReason, ConnectionId, SessionInfo, SessionState};
pub use infrastructure::network::{ServerError, SessionManager};
pub use infrastructure::storage::ServerConfig;
