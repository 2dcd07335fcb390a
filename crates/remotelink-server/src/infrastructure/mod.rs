//! Infrastructure layer for the server.
//!
//! Contains OS-facing adapters: the TCP listener and session registry, and
//! file-system storage for configuration.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain`, and
//! `remotelink_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod network;
pub mod storage;
