//! Binary codec for [`Envelope`]s.
//!
//! Wire format (all multi-byte integers are big-endian):
//! ```text
//! [version:1][payload_tag:1][priority:1][id:16][timestamp_us:8]
//! [metadata_count:4] { [key_len:4][key][value_len:4][value] } *
//! [payload body]
//! ```
//!
//! Payload bodies:
//!
//! | Variant     | Body                                                         |
//! |-------------|--------------------------------------------------------------|
//! | Text        | `[len:4][utf8]`                                              |
//! | Command     | `[name_len:4][name][count:4] { k, v } *`                     |
//! | Data        | `[key_len:4][key][len:4][bytes]`                             |
//! | Response    | `[success:1][msg_len:4][msg][has_result:1] ([len:4][bytes])?`|
//! | Heartbeat   | `[timestamp_us:8]`                                           |
//! | KeyExchange | `[len:4][bytes]`                                             |
//!
//! The decoder requires the input to contain exactly one envelope; trailing
//! bytes are rejected because the framing layer already delimits messages.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

use crate::protocol::envelope::{Envelope, Payload, PayloadKind, Priority};

/// Current envelope format version byte.
pub const FORMAT_VERSION: u8 = 0x01;

/// Size of the fixed envelope prefix (version, tag, priority, id, timestamp).
pub const ENVELOPE_PREFIX_SIZE: usize = 1 + 1 + 1 + 16 + 8;

/// Errors produced while encoding or decoding an envelope.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// The input ended before a field could be read.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The version byte is not [`FORMAT_VERSION`].
    #[error("unsupported envelope format version: {0}")]
    UnsupportedVersion(u8),

    /// The payload tag byte does not name a known variant.
    #[error("unknown payload tag: 0x{0:02X}")]
    UnknownPayloadTag(u8),

    /// The priority byte is out of range.
    #[error("unknown priority: 0x{0:02X}")]
    UnknownPriority(u8),

    /// A field held an invalid value (bad UTF-8, bad boolean, ...).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Bytes remained after a complete envelope was decoded.
    #[error("{0} trailing byte(s) after envelope")]
    TrailingBytes(usize),

    /// A field is too long to be length-prefixed.
    #[error("field {field} is too long to encode ({len} bytes)")]
    FieldTooLong { field: &'static str, len: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serializes `envelope` into its binary form.
///
/// # Errors
///
/// Returns [`FormatError::FieldTooLong`] if a string or byte field exceeds
/// `u32::MAX` bytes.
///
/// # Examples
///
/// ```rust
/// use remotelink_core::protocol::{decode_envelope, encode_envelope, Envelope};
///
/// let env = Envelope::text("hello");
/// let bytes = encode_envelope(&env).unwrap();
/// assert_eq!(decode_envelope(&bytes).unwrap(), env);
/// ```
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::with_capacity(ENVELOPE_PREFIX_SIZE + 64);

    buf.push(FORMAT_VERSION);
    buf.push(envelope.payload().kind() as u8);
    buf.push(envelope.priority() as u8);
    buf.extend_from_slice(envelope.id().as_bytes());
    buf.extend_from_slice(&envelope.timestamp_us().to_be_bytes());

    write_string_map(&mut buf, envelope.metadata(), "metadata")?;
    encode_payload(&mut buf, envelope.payload())?;
    Ok(buf)
}

/// Deserializes exactly one envelope from `bytes`.
///
/// # Errors
///
/// Returns [`FormatError`] on truncated or malformed input, unknown tags, or
/// trailing bytes.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, FormatError> {
    let mut r = Reader::new(bytes);

    let version = r.u8()?;
    if version != FORMAT_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let tag = r.u8()?;
    let kind = PayloadKind::try_from(tag).map_err(|_| FormatError::UnknownPayloadTag(tag))?;

    let priority_byte = r.u8()?;
    let priority =
        Priority::try_from(priority_byte).map_err(|_| FormatError::UnknownPriority(priority_byte))?;

    let id = r.uuid()?;
    let timestamp_us = r.u64()?;
    let metadata = r.string_map()?;
    let payload = decode_payload(kind, &mut r)?;

    if r.remaining() != 0 {
        return Err(FormatError::TrailingBytes(r.remaining()));
    }

    Ok(Envelope::builder(payload)
        .id(id)
        .timestamp_us(timestamp_us)
        .priority(priority)
        .extend_metadata(metadata)
        .build())
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(buf: &mut Vec<u8>, payload: &Payload) -> Result<(), FormatError> {
    match payload {
        Payload::Text { content } => write_bytes(buf, content.as_bytes(), "text")?,
        Payload::Command { name, params } => {
            write_bytes(buf, name.as_bytes(), "command name")?;
            write_string_map(buf, params, "command params")?;
        }
        Payload::Data { key, bytes } => {
            write_bytes(buf, key.as_bytes(), "data key")?;
            write_bytes(buf, bytes, "data bytes")?;
        }
        Payload::Response {
            success,
            message,
            result,
        } => {
            buf.push(u8::from(*success));
            write_bytes(buf, message.as_bytes(), "response message")?;
            match result {
                Some(bytes) => {
                    buf.push(0x01);
                    write_bytes(buf, bytes, "response result")?;
                }
                None => buf.push(0x00),
            }
        }
        Payload::Heartbeat { timestamp_us } => buf.extend_from_slice(&timestamp_us.to_be_bytes()),
        Payload::KeyExchange { public_key } => write_bytes(buf, public_key, "public key")?,
    }
    Ok(())
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(kind: PayloadKind, r: &mut Reader<'_>) -> Result<Payload, FormatError> {
    match kind {
        PayloadKind::Text => Ok(Payload::Text {
            content: r.string("text")?,
        }),
        PayloadKind::Command => {
            let name = r.string("command name")?;
            let params = r.string_map()?;
            Ok(Payload::Command { name, params })
        }
        PayloadKind::Data => {
            let key = r.string("data key")?;
            let bytes = r.bytes()?.to_vec();
            Ok(Payload::Data { key, bytes })
        }
        PayloadKind::Response => {
            let success = r.bool("response success")?;
            let message = r.string("response message")?;
            let result = if r.bool("response has_result")? {
                Some(r.bytes()?.to_vec())
            } else {
                None
            };
            Ok(Payload::Response {
                success,
                message,
                result,
            })
        }
        PayloadKind::Heartbeat => Ok(Payload::Heartbeat {
            timestamp_us: r.u64()?,
        }),
        PayloadKind::KeyExchange => Ok(Payload::KeyExchange {
            public_key: r.bytes()?.to_vec(),
        }),
    }
}

// ── Write helpers ─────────────────────────────────────────────────────────────

/// Writes a 4-byte length prefix followed by `bytes`.
fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8], field: &'static str) -> Result<(), FormatError> {
    let len = u32::try_from(bytes.len()).map_err(|_| FormatError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn write_string_map(
    buf: &mut Vec<u8>,
    map: &BTreeMap<String, String>,
    field: &'static str,
) -> Result<(), FormatError> {
    let count = u32::try_from(map.len()).map_err(|_| FormatError::FieldTooLong {
        field,
        len: map.len(),
    })?;
    buf.extend_from_slice(&count.to_be_bytes());
    for (key, value) in map {
        write_bytes(buf, key.as_bytes(), field)?;
        write_bytes(buf, value.as_bytes(), field)?;
    }
    Ok(())
}

// ── Read cursor ───────────────────────────────────────────────────────────────

/// Bounds-checked forward cursor over an input slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < n {
            return Err(FormatError::InsufficientData {
                needed: self.pos.saturating_add(n),
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn bool(&mut self, field: &str) -> Result<bool, FormatError> {
        match self.u8()? {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(FormatError::MalformedPayload(format!(
                "{field}: invalid boolean byte 0x{other:02X}"
            ))),
        }
    }

    fn uuid(&mut self) -> Result<Uuid, FormatError> {
        let b = self.take(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(b);
        Ok(Uuid::from_bytes(arr))
    }

    /// Reads a 4-byte length prefix and then that many bytes.
    fn bytes(&mut self) -> Result<&'a [u8], FormatError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self, field: &str) -> Result<String, FormatError> {
        let raw = self.bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| FormatError::MalformedPayload(format!("{field}: invalid UTF-8: {e}")))
    }

    fn string_map(&mut self) -> Result<BTreeMap<String, String>, FormatError> {
        let count = self.u32()? as usize;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.string("map key")?;
            let value = self.string("map value")?;
            if map.contains_key(&key) {
                return Err(FormatError::MalformedPayload(format!(
                    "duplicate map key '{key}'"
                )));
            }
            map.insert(key, value);
        }
        Ok(map)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
