//! Infrastructure layer for the client.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`, and
//! `remotelink_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod network;
