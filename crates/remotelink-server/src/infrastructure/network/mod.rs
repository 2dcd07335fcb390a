//! Network infrastructure for the server.
//!
//! - **`session_manager`**: binds the TCP listener, admits sessions under the
//!   `max_clients` limit, runs one task per session, and keeps the registry
//!   that `send_to_client`, `broadcast`, and `disconnect` operate on.

pub mod session_manager;

pub use session_manager::{ServerError, SessionManager};
