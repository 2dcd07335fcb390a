//! Key agreement and authenticated encryption for channel frames.

pub mod cipher;

pub use cipher::{CipherContext, CipherError, IV_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};
