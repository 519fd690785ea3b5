//! Wire format: frame delimiter, inbound message validation, and response
//! envelopes.
//!
//! Every message on the wire is a single `MsgPack` value followed by
//! [`FRAME_DELIMITER`]. Inbound messages must be maps. Responses are
//! [`Envelope`]s serialized with named fields via `rmp_serde::to_vec_named()`.

use rmpv::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Reason};

/// The raw 4-byte delimiter, before encoding.
pub const RAW_DELIMITER: [u8; 4] = *b"\r\n\r\n";

/// The frame delimiter as it appears on the wire: [`RAW_DELIMITER`] encoded
/// as a `MsgPack` bin 8 value (`0xc4`, length, payload).
pub const FRAME_DELIMITER: [u8; 6] = [0xc4, 0x04, b'\r', b'\n', b'\r', b'\n'];

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

/// Parses one frame and checks that it is a map.
///
/// Only the first value in the frame is read.
///
/// # Errors
///
/// Returns the `invalid.message.format` error if the frame is not valid
/// `MsgPack` or its top-level value is not a map.
pub fn decode_message(frame: &[u8]) -> Result<Value, &'static Error> {
    let mut cursor = frame;
    match rmpv::decode::read_value(&mut cursor) {
        Ok(message @ Value::Map(_)) => Ok(message),
        Ok(_) | Err(_) => Err(Reason::InvalidMessageFormat.error()),
    }
}

/// Looks up a string key in a decoded map message.
#[must_use]
pub fn map_get<'a>(message: &'a Value, key: &str) -> Option<&'a Value> {
    message
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One `{code, message}` entry of a failure envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub code: String,
    #[serde(rename = "mess")]
    pub message: String,
}

impl From<&Error> for ErrorEntry {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.message().to_string(),
        }
    }
}

/// Response envelope written back to the peer.
///
/// Field names are fixed: `succ`, `data` (success only, omitted when the
/// procedure produced nothing) and `errs` (failure only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "succ")]
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(rename = "errs", skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ErrorEntry>,
}

/// Errors from encoding or decoding an [`Envelope`].
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("envelope decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl Envelope {
    /// A success envelope carrying the procedure result, if any.
    #[must_use]
    pub fn success(data: Option<Value>) -> Self {
        Self {
            success: true,
            data,
            errors: Vec::new(),
        }
    }

    /// A failure envelope with a single error entry.
    #[must_use]
    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            errors: vec![ErrorEntry::from(error)],
        }
    }

    /// Serializes the envelope as a named `MsgPack` map.
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::Encode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Parses an envelope from `MsgPack` bytes.
    ///
    /// # Errors
    ///
    /// Returns `EnvelopeError::Decode` if the bytes are not an envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Maps the first error entry back onto the closed set of reasons.
    #[must_use]
    pub fn first_error(&self) -> Option<&'static Error> {
        self.errors
            .first()
            .and_then(|entry| Error::from_code(&entry.code))
    }
}
