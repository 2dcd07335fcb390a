//! Envelope type model and its binary codec.

pub mod codec;
pub mod envelope;

pub use codec::{decode_envelope, encode_envelope, FormatError, FORMAT_VERSION};
pub use envelope::{
    now_us, Envelope, EnvelopeBuilder, Payload, PayloadKind, Priority, CORRELATION_ID_KEY,
    DISPLAY_NAME_KEY,
};
