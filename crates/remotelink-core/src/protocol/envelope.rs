//! The RemoteLink envelope: one tagged payload plus metadata.
//!
//! Every value that crosses a channel is wrapped in an [`Envelope`].  The
//! payload is a closed set of variants ([`Payload`]); consumers match on it
//! exhaustively, so adding a variant is a compile error everywhere it matters.
//!
//! Envelopes are immutable once built.  Use [`Envelope::builder`] (or one of
//! the shorthand constructors) to create one; the id and creation timestamp are
//! filled in automatically unless set explicitly.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Metadata key that links a response to the envelope it answers.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Metadata key carrying a peer's human-readable name during the handshake.
pub const DISPLAY_NAME_KEY: &str = "display_name";

// ── Priority ──────────────────────────────────────────────────────────────────

/// Delivery priority hint.  Ordered `Low < Normal < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    Low = 0x00,
    #[default]
    Normal = 0x01,
    High = 0x02,
    Critical = 0x03,
}

impl TryFrom<u8> for Priority {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Priority::Low),
            0x01 => Ok(Priority::Normal),
            0x02 => Ok(Priority::High),
            0x03 => Ok(Priority::Critical),
            _ => Err(()),
        }
    }
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// Wire tag for each [`Payload`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    Text = 0x01,
    Command = 0x02,
    Data = 0x03,
    Response = 0x04,
    Heartbeat = 0x05,
    KeyExchange = 0x06,
}

impl TryFrom<u8> for PayloadKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PayloadKind::Text),
            0x02 => Ok(PayloadKind::Command),
            0x03 => Ok(PayloadKind::Data),
            0x04 => Ok(PayloadKind::Response),
            0x05 => Ok(PayloadKind::Heartbeat),
            0x06 => Ok(PayloadKind::KeyExchange),
            _ => Err(()),
        }
    }
}

/// The body of an envelope.  Exactly one variant is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Free-form text.
    Text { content: String },
    /// A named verb with string parameters.
    Command {
        name: String,
        params: BTreeMap<String, String>,
    },
    /// Opaque bytes addressed by a key.  Equal when key and bytes are equal.
    Data { key: String, bytes: Vec<u8> },
    /// Outcome of an earlier request.
    Response {
        success: bool,
        message: String,
        result: Option<Vec<u8>>,
    },
    /// Liveness probe carrying the sender's clock (microseconds since epoch).
    Heartbeat { timestamp_us: u64 },
    /// Raw public key bytes; only ever sent during the handshake.
    KeyExchange { public_key: Vec<u8> },
}

impl Payload {
    /// Returns the wire tag for this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Text { .. } => PayloadKind::Text,
            Payload::Command { .. } => PayloadKind::Command,
            Payload::Data { .. } => PayloadKind::Data,
            Payload::Response { .. } => PayloadKind::Response,
            Payload::Heartbeat { .. } => PayloadKind::Heartbeat,
            Payload::KeyExchange { .. } => PayloadKind::KeyExchange,
        }
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// A structured unit of communication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    id: Uuid,
    timestamp_us: u64,
    payload: Payload,
    metadata: BTreeMap<String, String>,
    priority: Priority,
}

impl Envelope {
    /// Starts building an envelope around `payload`.
    pub fn builder(payload: Payload) -> EnvelopeBuilder {
        EnvelopeBuilder {
            id: None,
            timestamp_us: None,
            payload,
            metadata: BTreeMap::new(),
            priority: Priority::Normal,
        }
    }

    /// Builds an envelope with default priority and no metadata.
    pub fn new(payload: Payload) -> Self {
        Self::builder(payload).build()
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(Payload::Text {
            content: content.into(),
        })
    }

    /// Builds a `Command` envelope from a verb and `(key, value)` pairs.
    pub fn command<K, V>(name: impl Into<String>, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(Payload::Command {
            name: name.into(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        })
    }

    pub fn data(key: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(Payload::Data {
            key: key.into(),
            bytes,
        })
    }

    /// Builds a heartbeat stamped with the current time.
    pub fn heartbeat() -> Self {
        Self::new(Payload::Heartbeat {
            timestamp_us: now_us(),
        })
    }

    pub fn key_exchange(public_key: Vec<u8>) -> Self {
        Self::new(Payload::KeyExchange { public_key })
    }

    /// Builds a `Response` answering `original`.
    ///
    /// The response carries `correlation_id = original.id()` in its metadata and
    /// inherits the original's priority.
    pub fn response_to(
        original: &Envelope,
        success: bool,
        message: impl Into<String>,
        result: Option<Vec<u8>>,
    ) -> Self {
        Self::response_for(original.id, original.priority, success, message, result)
    }

    /// Like [`response_to`](Self::response_to), for callers that have already
    /// consumed the request and kept only its id and priority.
    pub fn response_for(
        request_id: Uuid,
        priority: Priority,
        success: bool,
        message: impl Into<String>,
        result: Option<Vec<u8>>,
    ) -> Self {
        Self::builder(Payload::Response {
            success,
            message: message.into(),
            result,
        })
        .metadata(CORRELATION_ID_KEY, request_id.to_string())
        .priority(priority)
        .build()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Creation time in microseconds since the Unix epoch.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the envelope and returns its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Looks up a single metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the id of the envelope this one answers, if it is a response
    /// built with [`Envelope::response_to`].
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.metadata_value(CORRELATION_ID_KEY)
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Returns `true` if the payload is [`Payload::KeyExchange`].
    pub fn is_key_exchange(&self) -> bool {
        matches!(self.payload, Payload::KeyExchange { .. })
    }
}

/// Builder for [`Envelope`].
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    id: Option<Uuid>,
    timestamp_us: Option<u64>,
    payload: Payload,
    metadata: BTreeMap<String, String>,
    priority: Priority,
}

impl EnvelopeBuilder {
    /// Uses an explicit id instead of a fresh UUID v4.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Uses an explicit creation timestamp instead of "now".
    pub fn timestamp_us(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = Some(timestamp_us);
        self
    }

    /// Adds one metadata entry, replacing any previous value for `key`.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Adds every entry of `entries` to the metadata.
    pub fn extend_metadata<K, V>(mut self, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn build(self) -> Envelope {
        Envelope {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            timestamp_us: self.timestamp_us.unwrap_or_else(now_us),
            payload: self.payload,
            metadata: self.metadata,
            priority: self.priority,
        }
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assigns_fresh_id_and_timestamp() {
        // Arrange / Act
        let a = Envelope::text("a");
        let b = Envelope::text("a");

        // Assert
        assert_ne!(a.id(), b.id(), "each build must get a unique id");
        assert!(a.timestamp_us() > 0);
    }

    #[test]
    fn test_builder_keeps_explicit_id_and_timestamp() {
        let id = Uuid::new_v4();
        let env = Envelope::builder(Payload::Heartbeat { timestamp_us: 7 })
            .id(id)
            .timestamp_us(42)
            .build();
        assert_eq!(env.id(), id);
        assert_eq!(env.timestamp_us(), 42);
    }

    #[test]
    fn test_default_priority_is_normal() {
        assert_eq!(Envelope::text("x").priority(), Priority::Normal);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn test_priority_try_from_rejects_unknown_byte() {
        assert_eq!(Priority::try_from(0x03), Ok(Priority::Critical));
        assert!(Priority::try_from(0x04).is_err());
    }

    #[test]
    fn test_metadata_last_write_wins() {
        let env = Envelope::builder(Payload::Text {
            content: String::new(),
        })
        .metadata("k", "1")
        .metadata("k", "2")
        .build();
        assert_eq!(env.metadata_value("k"), Some("2"));
        assert_eq!(env.metadata().len(), 1);
    }

    #[test]
    fn test_response_to_correlates_with_original() {
        // Arrange
        let original = Envelope::builder(Payload::Text {
            content: "hi".into(),
        })
        .priority(Priority::High)
        .build();

        // Act
        let response = Envelope::response_to(&original, true, "ok", None);

        // Assert
        assert_eq!(response.correlation_id(), Some(original.id()));
        assert_eq!(response.priority(), Priority::High);
        assert_eq!(
            response.payload(),
            &Payload::Response {
                success: true,
                message: "ok".into(),
                result: None
            }
        );
    }

    #[test]
    fn test_command_constructor_collects_params() {
        let env = Envelope::command("echo", [("message", "hi")]);
        match env.payload() {
            Payload::Command { name, params } => {
                assert_eq!(name, "echo");
                assert_eq!(params.get("message").map(String::as_str), Some("hi"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_data_equality_is_by_key_and_bytes() {
        let a = Payload::Data {
            key: "k".into(),
            bytes: vec![1, 2, 3],
        };
        let b = Payload::Data {
            key: "k".into(),
            bytes: vec![1, 2, 3],
        };
        let c = Payload::Data {
            key: "k".into(),
            bytes: vec![1, 2, 4],
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_is_key_exchange() {
        assert!(Envelope::key_exchange(vec![0; 32]).is_key_exchange());
        assert!(!Envelope::heartbeat().is_key_exchange());
    }

    #[test]
    fn test_payload_kind_round_trips_through_u8() {
        for kind in [
            PayloadKind::Text,
            PayloadKind::Command,
            PayloadKind::Data,
            PayloadKind::Response,
            PayloadKind::Heartbeat,
            PayloadKind::KeyExchange,
        ] {
            assert_eq!(PayloadKind::try_from(kind as u8), Ok(kind));
        }
        assert!(PayloadKind::try_from(0xFF).is_err());
    }
}
