//! Application layer for the client.
//!
//! - **`error`**: [`error::ClientError`], returned by every fallible client
//!   operation and passed to `on_error`.
//! - **`events`**: the [`events::ClientEvents`] callback trait.
//! - **`outbound_queue`**: bounded, expiring FIFO for envelopes sent while no
//!   link is up.

pub mod error;
pub mod events;
pub mod outbound_queue;
