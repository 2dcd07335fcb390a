//! Application layer for the server.
//!
//! Decides *what* happens to traffic without doing any I/O itself.
//!
//! - **`dispatch`**: maps each inbound envelope on an established session to
//!   an [`dispatch::Action`] (reply, reply-then-close, forward data, ignore).
//!
//! - **`events`**: the [`events::SessionEvents`] trait through which the
//!   session manager reports connects, disconnects, traffic, and errors.

pub mod dispatch;
pub mod events;
