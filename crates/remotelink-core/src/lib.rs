//! # remotelink-core
//!
//! Shared library for RemoteLink containing the envelope model, its binary
//! codec, the key-exchange and cipher engine, and the encrypted framing layer.
//!
//! Both the server and the client build on this crate.  It has no knowledge of
//! sessions, registries, or reconnection; those live in `remotelink-server` and
//! `remotelink-client`.
//!
//! - **`protocol`**: the [`Envelope`] type with its closed set of payload
//!   variants, and a compact big-endian binary encoding.
//!
//! - **`crypto`**: X25519 key agreement feeding an AES-256-GCM
//!   [`CipherContext`].  Every frame gets a fresh random IV.
//!
//! - **`channel`**: [`SecureChannel`], a length-prefixed, encrypted envelope
//!   pipe over any `AsyncRead + AsyncWrite` stream, including the handshake
//!   that establishes its key.

pub mod channel;
pub mod crypto;
pub mod protocol;

pub use channel::{ChannelConfig, ChannelError, SecureChannel, DEFAULT_MAX_FRAME_LEN};
pub use crypto::{CipherContext, CipherError};
pub use protocol::{decode_envelope, encode_envelope, Envelope, FormatError, Payload, Priority};
