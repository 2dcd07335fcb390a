//! Domain types for the server: session identity, state, and snapshots.
//!
//! No I/O lives here.

pub mod session;

pub use session::{
    CloseReason, ConnectionId, ConnectionIdGenerator, SessionInfo, SessionState,
};
