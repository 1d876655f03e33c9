//! Codec trait and implementations for serializing/deserializing frames.
//!
//! A codec converts between Rust values and the bytes of a WebSocket
//! frame. The realtime layer never calls `serde_json` directly; it goes
//! through a [`Codec`], so validation lives in one place and a test can
//! swap the wire format.
//!
//! Decoding an inbound frame happens in two steps:
//!
//! 1. **Shape**: [`Codec::decode`] turns bytes into a [`LocationUpdate`].
//!    The struct uses `deny_unknown_fields`, so `{"lat": 1}` or a frame
//!    with an extra `speed` field fails here as [`ProtocolError::Decode`].
//! 2. **Meaning**: [`LocationUpdate::validate`] rejects values that
//!    parsed but cannot be a position (NaN, a latitude of 95°) as
//!    [`ProtocolError::InvalidMessage`].
//!
//! [`Codec::decode_location`] runs both. The handler answers either
//! failure with a `400` and keeps the connection open.

use serde::{de::DeserializeOwned, Serialize};

use crate::{LocationUpdate, ProtocolError};

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec value lives in the shared
/// server state and is used from every connection task at once.
///
/// `decode` asks for `DeserializeOwned` so the decoded value owns its
/// data and the frame buffer can be dropped right after.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// Decodes an inbound frame as a location update and validates its
    /// coordinates.
    fn decode_location(&self, data: &[u8]) -> Result<LocationUpdate, ProtocolError> {
        let update: LocationUpdate = self.decode(data)?;
        update.validate()?;
        Ok(update)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use shuttle_protocol::{Codec, JsonCodec, StatusResponse};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&StatusResponse::ok("Message broadcasted")).unwrap();
/// let decoded: StatusResponse = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded.code, 200);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
