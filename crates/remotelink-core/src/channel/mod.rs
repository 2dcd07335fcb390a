//! Length-framed, encrypted transport over any async byte stream.
//!
//! Every message on the wire is a 4-byte big-endian length followed by exactly
//! that many bytes.  The two handshake frames carry a serialized
//! `KeyExchange` envelope in the clear; every later frame is an AES-GCM
//! sealed envelope (see [`crate::crypto`]).
//!
//! A [`SecureChannel`] splits the stream into halves guarded by separate
//! locks, so one task can block in [`SecureChannel::receive`] while others
//! call [`SecureChannel::send`].

use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::crypto::{CipherContext, CipherError};
use crate::protocol::{decode_envelope, encode_envelope, Envelope, FormatError, Payload, Priority};

/// Size of the big-endian length prefix on every frame.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default ceiling on a single frame body.
pub const DEFAULT_MAX_FRAME_LEN: usize = 10_000_000;

/// Errors raised by a [`SecureChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying stream failed or ended inside a frame.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The channel was closed locally.
    #[error("channel is closed")]
    Closed,

    /// A frame header declared a length of zero or above the ceiling.
    #[error("frame length {declared} outside 1..={max}")]
    FrameLength { declared: usize, max: usize },

    /// The frame body was not a valid envelope.
    #[error("malformed envelope: {0}")]
    Format(#[from] FormatError),

    /// An encrypted frame failed authentication.
    #[error("frame authentication failed")]
    Authentication,

    /// The peer sent something the handshake does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The operation is not valid in the channel's current state.
    #[error("invalid channel state: {0}")]
    State(String),

    /// The handshake did not finish in time.
    #[error("handshake timed out")]
    HandshakeTimeout,
}

impl ChannelError {
    /// Returns `true` if the channel cannot be used after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::State(_))
    }
}

impl From<CipherError> for ChannelError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::NotReady(reason) => ChannelError::State(reason.to_string()),
            CipherError::Authentication => ChannelError::Authentication,
            CipherError::InvalidPublicKey(reason) => {
                ChannelError::Protocol(format!("invalid public key: {reason}"))
            }
            CipherError::Encrypt => ChannelError::State("encryption failed".to_string()),
        }
    }
}

/// Tunables for a [`SecureChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Largest frame body accepted or sent, in bytes.
    pub max_frame_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ── Framing ───────────────────────────────────────────────────────────────────

/// Reads one frame body.
///
/// Returns `Ok(None)` on a clean end-of-stream before any header byte.  The
/// declared length is checked before the body is read.
pub async fn read_frame<R>(reader: &mut R, max_frame_len: usize) -> Result<Option<Vec<u8>>, ChannelError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ChannelError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a frame header",
            )));
        }
        filled += n;
    }

    let declared = u32::from_be_bytes(header) as usize;
    if declared == 0 || declared > max_frame_len {
        return Err(ChannelError::FrameLength {
            declared,
            max: max_frame_len,
        });
    }

    let mut body = vec![0u8; declared];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes `body` as one frame with a single `write_all`, then flushes.
pub async fn write_frame<W>(writer: &mut W, body: &[u8], max_frame_len: usize) -> Result<(), ChannelError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if body.is_empty() || body.len() > max_frame_len {
        return Err(ChannelError::FrameLength {
            declared: body.len(),
            max: max_frame_len,
        });
    }
    let declared = u32::try_from(body.len()).map_err(|_| ChannelError::FrameLength {
        declared: body.len(),
        max: max_frame_len,
    })?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&declared.to_be_bytes());
    frame.extend_from_slice(body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ── SecureChannel ─────────────────────────────────────────────────────────────

/// An encrypted, framed, bidirectional envelope channel.
pub struct SecureChannel {
    reader: Mutex<BoxedReader>,
    writer: Mutex<Option<BoxedWriter>>,
    cipher: StdMutex<CipherContext>,
    closed: watch::Sender<bool>,
    config: ChannelConfig,
}

impl SecureChannel {
    /// Wraps `stream`, which may be a TCP socket or an in-memory duplex.
    pub fn new<S>(stream: S, config: ChannelConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(Box::new(read_half)),
            writer: Mutex::new(Some(Box::new(write_half))),
            cipher: StdMutex::new(CipherContext::new()),
            closed,
            config,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Returns `true` once the handshake has installed a session key.
    pub fn is_ready(&self) -> bool {
        self.cipher().is_ready()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Runs the initiating side of the key exchange.
    ///
    /// Sends a `KeyExchange` envelope carrying `metadata`, waits for the peer's,
    /// and returns the peer's envelope.
    pub async fn handshake_as_initiator(
        &self,
        metadata: BTreeMap<String, String>,
    ) -> Result<Envelope, ChannelError> {
        self.ensure_handshake_allowed()?;

        let public_key = self.cipher().initiate();
        self.send_plain(&key_exchange(public_key.to_vec(), metadata))
            .await?;

        let reply = self.receive_key_exchange().await?;
        self.complete_with(&reply)?;
        debug!("handshake complete (initiator)");
        Ok(reply)
    }

    /// Runs the responding side of the key exchange and returns the
    /// initiator's envelope.
    pub async fn handshake_as_responder(
        &self,
        metadata: BTreeMap<String, String>,
    ) -> Result<Envelope, ChannelError> {
        self.ensure_handshake_allowed()?;

        let offer = self.receive_key_exchange().await?;
        let public_key = self.cipher().initiate();
        self.complete_with(&offer)?;

        self.send_plain(&key_exchange(public_key.to_vec(), metadata))
            .await?;
        debug!("handshake complete (responder)");
        Ok(offer)
    }

    /// Encrypts and sends one envelope.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] after [`close`](Self::close),
    /// [`ChannelError::State`] before the handshake, or a transport error.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let plaintext = encode_envelope(envelope)?;
        let sealed = self.cipher().encrypt(&plaintext)?;
        self.write_body(&sealed).await
    }

    /// Receives and decrypts the next envelope.
    ///
    /// Returns `Ok(None)` when the peer ends the stream cleanly or the channel
    /// is closed locally while waiting.
    pub async fn receive(&self) -> Result<Option<Envelope>, ChannelError> {
        if !self.is_ready() {
            if self.is_closed() {
                return Ok(None);
            }
            return Err(ChannelError::State("handshake not complete".to_string()));
        }

        let Some(sealed) = self.read_body().await? else {
            return Ok(None);
        };
        let plaintext = self.cipher().decrypt(&sealed)?;
        Ok(Some(decode_envelope(&plaintext)?))
    }

    /// Closes the channel.  Idempotent.
    ///
    /// Wakes a pending [`receive`](Self::receive), abandons any in-flight
    /// [`send`](Self::send) (which returns [`ChannelError::Closed`]), shuts down
    /// the write half, and discards the session key.  Never waits on the peer.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.cipher().clear();
        debug!("channel closed");
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn cipher(&self) -> MutexGuard<'_, CipherContext> {
        self.cipher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_handshake_allowed(&self) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.is_ready() {
            return Err(ChannelError::State("handshake already complete".to_string()));
        }
        Ok(())
    }

    fn complete_with(&self, peer: &Envelope) -> Result<(), ChannelError> {
        match peer.payload() {
            Payload::KeyExchange { public_key } => Ok(self.cipher().complete(public_key)?),
            other => Err(ChannelError::Protocol(format!(
                "expected KeyExchange, got {:?}",
                other.kind()
            ))),
        }
    }

    async fn send_plain(&self, envelope: &Envelope) -> Result<(), ChannelError> {
        let body = encode_envelope(envelope)?;
        self.write_body(&body).await
    }

    async fn receive_key_exchange(&self) -> Result<Envelope, ChannelError> {
        let body = self.read_body().await?.ok_or_else(|| {
            ChannelError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed during handshake",
            ))
        })?;
        let envelope = decode_envelope(&body)?;
        if !envelope.is_key_exchange() {
            return Err(ChannelError::Protocol(format!(
                "expected KeyExchange, got {:?}",
                envelope.payload().kind()
            )));
        }
        Ok(envelope)
    }

    /// Writes one frame body, abandoning the write if the channel closes.
    ///
    /// A peer that stops reading can block `write_all` indefinitely; racing it
    /// against the close signal releases the writer lock for `close`.
    async fn write_body(&self, body: &[u8]) -> Result<(), ChannelError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ChannelError::Closed);
        }

        tokio::select! {
            _ = wait_closed(&mut closed) => Err(ChannelError::Closed),
            result = async {
                let mut guard = self.writer.lock().await;
                let writer = guard.as_mut().ok_or(ChannelError::Closed)?;
                write_frame(writer, body, self.config.max_frame_len).await
            } => result,
        }
    }

    /// Reads one frame body, giving up with `Ok(None)` if the channel closes.
    async fn read_body(&self) -> Result<Option<Vec<u8>>, ChannelError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Ok(None);
        }

        tokio::select! {
            _ = wait_closed(&mut closed) => Ok(None),
            result = async {
                let mut reader = self.reader.lock().await;
                read_frame(&mut *reader, self.config.max_frame_len).await
            } => result,
        }
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("ready", &self.is_ready())
            .field("closed", &self.is_closed())
            .field("config", &self.config)
            .finish()
    }
}

fn key_exchange(public_key: Vec<u8>, metadata: BTreeMap<String, String>) -> Envelope {
    Envelope::builder(Payload::KeyExchange { public_key })
        .extend_metadata(metadata)
        .priority(Priority::Critical)
        .build()
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::protocol::DISPLAY_NAME_KEY;

    fn named(name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(DISPLAY_NAME_KEY.to_string(), name.to_string())])
    }

    /// Two channels over an in-memory pipe, handshake complete.
    async fn connected_pair(config: ChannelConfig) -> (SecureChannel, SecureChannel) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = SecureChannel::new(a, config.clone());
        let server = SecureChannel::new(b, config);
        let (c, s) = tokio::join!(
            client.handshake_as_initiator(named("client")),
            server.handshake_as_responder(named("server")),
        );
        c.expect("initiator handshake");
        s.expect("responder handshake");
        (client, server)
    }

    // ── Framing ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_read_frame_clean_eof_returns_none() {
        let mut mock = tokio_test::io::Builder::new().build();
        let frame = read_frame(&mut mock, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_read_frame_eof_inside_header_is_transport_error() {
        let mut mock = tokio_test::io::Builder::new().read(&[0x00, 0x00]).build();
        let err = read_frame(&mut mock, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_read_frame_eof_inside_body_is_transport_error() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 5])
            .read(&[1, 2])
            .build();
        let err = read_frame(&mut mock, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized_length_before_body() {
        // Arrange: only the header is scripted; reading any body byte would
        // find nothing and fail differently.
        let mut mock = tokio_test::io::Builder::new()
            .read(&10_000_001u32.to_be_bytes())
            .build();

        // Act
        let err = read_frame(&mut mock, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();

        // Assert
        assert!(matches!(
            err,
            ChannelError::FrameLength {
                declared: 10_000_001,
                max: DEFAULT_MAX_FRAME_LEN
            }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_zero_length() {
        let mut mock = tokio_test::io::Builder::new().read(&[0, 0, 0, 0]).build();
        let err = read_frame(&mut mock, DEFAULT_MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, ChannelError::FrameLength { declared: 0, .. }));
    }

    #[tokio::test]
    async fn test_read_frame_accepts_split_header() {
        let mut mock = tokio_test::io::Builder::new()
            .read(&[0, 0])
            .read(&[0, 3])
            .read(&[9, 8, 7])
            .build();
        let body = read_frame(&mut mock, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert_eq!(body, Some(vec![9, 8, 7]));
    }

    #[tokio::test]
    async fn test_write_frame_emits_header_and_body_in_one_write() {
        let mut mock = tokio_test::io::Builder::new()
            .write(&[0, 0, 0, 3, 1, 2, 3])
            .build();
        write_frame(&mut mock, &[1, 2, 3], DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_frame_rejects_body_over_ceiling() {
        let mut mock = tokio_test::io::Builder::new().build();
        let err = write_frame(&mut mock, &[0u8; 11], 10).await.unwrap_err();
        assert!(matches!(err, ChannelError::FrameLength { declared: 11, max: 10 }));
    }

    // ── Handshake ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_handshake_exchanges_display_names() {
        // Arrange
        let (a, b) = tokio::io::duplex(4096);
        let client = SecureChannel::new(a, ChannelConfig::default());
        let server = SecureChannel::new(b, ChannelConfig::default());

        // Act
        let (from_server, from_client) = tokio::join!(
            client.handshake_as_initiator(named("laptop")),
            server.handshake_as_responder(named("hub")),
        );

        // Assert
        assert_eq!(
            from_client.unwrap().metadata_value(DISPLAY_NAME_KEY),
            Some("laptop")
        );
        assert_eq!(
            from_server.unwrap().metadata_value(DISPLAY_NAME_KEY),
            Some("hub")
        );
        assert!(client.is_ready());
        assert!(server.is_ready());
    }

    #[tokio::test]
    async fn test_envelopes_flow_both_ways_after_handshake() {
        let (client, server) = connected_pair(ChannelConfig::default()).await;

        let sent = Envelope::command("echo", [("message", "hi")]);
        client.send(&sent).await.unwrap();
        assert_eq!(server.receive().await.unwrap(), Some(sent.clone()));

        let reply = Envelope::response_to(&sent, true, "hi", None);
        server.send(&reply).await.unwrap();
        assert_eq!(client.receive().await.unwrap(), Some(reply));
    }

    #[tokio::test]
    async fn test_send_before_handshake_is_state_error() {
        let (a, _b) = tokio::io::duplex(1024);
        let channel = SecureChannel::new(a, ChannelConfig::default());
        let err = channel.send(&Envelope::text("early")).await.unwrap_err();
        assert!(matches!(err, ChannelError::State(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_receive_before_handshake_is_state_error() {
        let (a, _b) = tokio::io::duplex(1024);
        let channel = SecureChannel::new(a, ChannelConfig::default());
        assert!(matches!(
            channel.receive().await,
            Err(ChannelError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_second_handshake_is_state_error() {
        let (client, _server) = connected_pair(ChannelConfig::default()).await;
        assert!(matches!(
            client.handshake_as_initiator(BTreeMap::new()).await,
            Err(ChannelError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_responder_rejects_non_key_exchange_first_frame() {
        // Arrange: the initiator side speaks raw frames and opens with Text.
        let (mut raw, b) = tokio::io::duplex(4096);
        let server = SecureChannel::new(b, ChannelConfig::default());
        let body = encode_envelope(&Envelope::text("hello?")).unwrap();
        write_frame(&mut raw, &body, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();

        // Act
        let result = server.handshake_as_responder(BTreeMap::new()).await;

        // Assert
        assert!(matches!(result, Err(ChannelError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_tampered_frame_is_authentication_error() {
        // Arrange: a hand-driven peer that completes the key exchange itself.
        let (mut raw, b) = tokio::io::duplex(4096);
        let server = SecureChannel::new(b, ChannelConfig::default());
        let mut peer_cipher = CipherContext::new();
        let offer = key_exchange(peer_cipher.initiate().to_vec(), BTreeMap::new());
        write_frame(&mut raw, &encode_envelope(&offer).unwrap(), DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();
        server
            .handshake_as_responder(BTreeMap::new())
            .await
            .unwrap();
        let reply = read_frame(&mut raw, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap()
            .unwrap();
        match decode_envelope(&reply).unwrap().into_payload() {
            Payload::KeyExchange { public_key } => peer_cipher.complete(&public_key).unwrap(),
            other => panic!("unexpected payload {other:?}"),
        }

        let plaintext = encode_envelope(&Envelope::text("tamper")).unwrap();
        let mut sealed = peer_cipher.encrypt(&plaintext).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;
        write_frame(&mut raw, &sealed, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap();

        // Act
        let err = server.receive().await.unwrap_err();

        // Assert
        assert!(matches!(err, ChannelError::Authentication));
        assert!(err.is_fatal());
    }

    // ── Close & EOF ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_peer_close_yields_clean_end_of_stream() {
        let (client, server) = connected_pair(ChannelConfig::default()).await;
        client.close().await;
        drop(client);
        assert!(server.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_receive() {
        // Arrange
        let (client, _server) = connected_pair(ChannelConfig::default()).await;
        let client = Arc::new(client);
        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Act
        client.close().await;

        // Assert
        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("receive must unblock")
            .expect("task must not panic");
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_send_after_close_fails() {
        let (client, _server) = connected_pair(ChannelConfig::default()).await;
        client.close().await;
        client.close().await;
        assert!(client.is_closed());
        assert!(!client.is_ready());
        assert!(matches!(
            client.send(&Envelope::text("late")).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_abandons_send_blocked_on_a_peer_that_never_reads() {
        // Arrange: a small pipe and a 1 MiB push the peer never drains.
        let (a, b) = tokio::io::duplex(4096);
        let server = Arc::new(SecureChannel::new(a, ChannelConfig::default()));
        let client = SecureChannel::new(b, ChannelConfig::default());
        let (s, c) = tokio::join!(
            server.handshake_as_responder(named("server")),
            client.handshake_as_initiator(named("client")),
        );
        s.unwrap();
        c.unwrap();
        let blocked = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .send(&Envelope::data("bulk", vec![7u8; 1024 * 1024]))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "send should be stuck on back-pressure");

        // Act
        let closed = tokio::time::timeout(Duration::from_secs(2), server.close()).await;

        // Assert
        assert!(closed.is_ok(), "close must not wait for the stalled write");
        let result = tokio::time::timeout(Duration::from_secs(2), blocked)
            .await
            .expect("blocked send must return")
            .expect("task must not panic");
        assert!(matches!(result, Err(ChannelError::Closed)));
        drop(client);
    }

    #[tokio::test]
    async fn test_large_payload_crosses_channel() {
        // Arrange: lift the ceiling so a 10 MiB body plus overhead fits.
        let config = ChannelConfig {
            max_frame_len: 16 * 1024 * 1024,
        };
        let (client, server) = connected_pair(config).await;
        let bytes: Vec<u8> = (0..10 * 1024 * 1024).map(|i| (i % 253) as u8).collect();
        let sent = Envelope::data("blob", bytes);

        // Act
        let (send_result, received) = tokio::join!(client.send(&sent), server.receive());

        // Assert
        send_result.unwrap();
        assert_eq!(received.unwrap(), Some(sent));
    }

    #[tokio::test]
    async fn test_payload_over_ceiling_is_refused_by_sender() {
        let config = ChannelConfig { max_frame_len: 256 };
        let (client, _server) = connected_pair(config).await;
        let err = client
            .send(&Envelope::data("big", vec![0u8; 512]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::FrameLength { max: 256, .. }));
    }
}
