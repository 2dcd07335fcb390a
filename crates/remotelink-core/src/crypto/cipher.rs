//! X25519 key agreement and AES-256-GCM frame protection.
//!
//! A [`CipherContext`] moves through three states:
//!
//! 1. **idle**: no key material.
//! 2. **initiated**: [`CipherContext::initiate`] generated an ephemeral
//!    secret and returned the public half for the peer.
//! 3. **ready**: [`CipherContext::complete`] combined the ephemeral secret
//!    with the peer's public key; the SHA-256 of the shared secret is the
//!    AES-256 key used for both directions.
//!
//! Encrypted frames are `iv (12) || ciphertext || tag (16)`.  Each call to
//! [`CipherContext::encrypt`] draws a fresh IV from the OS RNG.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroize;

/// Length of an X25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Length of the AES-GCM initialisation vector in bytes.
pub const IV_SIZE: usize = 12;

/// Length of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Errors produced by [`CipherContext`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The operation needs state the context does not have yet (or any more).
    #[error("cipher not ready: {0}")]
    NotReady(&'static str),

    /// The frame failed authentication or is too short to be a frame.
    #[error("frame authentication failed")]
    Authentication,

    /// The peer's public key is malformed or yields a low-order shared secret.
    #[error("invalid peer public key: {0}")]
    InvalidPublicKey(&'static str),

    /// AES-GCM refused to encrypt the input.
    #[error("encryption failed")]
    Encrypt,
}

/// Per-channel key agreement and symmetric cipher state.
#[derive(Default)]
pub struct CipherContext {
    secret: Option<EphemeralSecret>,
    cipher: Option<Aes256Gcm>,
}

impl CipherContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh ephemeral key pair and returns the public key bytes.
    ///
    /// Calling this again before [`complete`](Self::complete) discards the
    /// previous secret.
    pub fn initiate(&mut self) -> [u8; PUBLIC_KEY_SIZE] {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        self.secret = Some(secret);
        public.to_bytes()
    }

    /// Derives the session key from the peer's public key.
    ///
    /// # Errors
    ///
    /// - [`CipherError::NotReady`] if [`initiate`](Self::initiate) has not been
    ///   called.
    /// - [`CipherError::InvalidPublicKey`] if `peer_public_key` is not 32 bytes
    ///   or the agreement is non-contributory.
    pub fn complete(&mut self, peer_public_key: &[u8]) -> Result<(), CipherError> {
        let peer: [u8; PUBLIC_KEY_SIZE] = peer_public_key
            .try_into()
            .map_err(|_| CipherError::InvalidPublicKey("expected 32 bytes"))?;
        let secret = self
            .secret
            .take()
            .ok_or(CipherError::NotReady("complete called before initiate"))?;

        let shared = secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CipherError::InvalidPublicKey("low-order point"));
        }

        let mut key: [u8; 32] = Sha256::digest(shared.as_bytes()).into();
        let cipher = Aes256Gcm::new_from_slice(&key);
        key.zeroize();
        self.cipher = Some(cipher.map_err(|_| CipherError::Encrypt)?);
        Ok(())
    }

    /// Returns `true` once a session key is installed.
    pub fn is_ready(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypts `plaintext` into `iv || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or(CipherError::NotReady("no session key"))?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut frame = Vec::with_capacity(IV_SIZE + sealed.len());
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&sealed);
        Ok(frame)
    }

    /// Verifies and decrypts a frame produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>, CipherError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or(CipherError::NotReady("no session key"))?;

        if frame.len() < IV_SIZE + TAG_SIZE {
            return Err(CipherError::Authentication);
        }
        let (iv, sealed) = frame.split_at(IV_SIZE);
        cipher
            .decrypt(Nonce::from_slice(iv), sealed)
            .map_err(|_| CipherError::Authentication)
    }

    /// Drops all key material and returns the context to idle.
    pub fn clear(&mut self) {
        self.secret = None;
        self.cipher = None;
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("initiated", &self.secret.is_some())
            .field("ready", &self.is_ready())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
