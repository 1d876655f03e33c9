//! Error types for the protocol layer.
//!
//! Each shuttle crate defines its own error enum, and the `shuttle` facade
//! wraps them all in `ShuttleError`. A `ProtocolError` always means the
//! bytes or the path were wrong, never the network or the session.

/// Errors that can occur in the protocol layer.
///
/// Only [`Encode`](Self::Encode) points at a server bug. The other
/// variants describe bad client input and map to a `400` or `404` status
/// frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing or unknown
    /// fields, wrong types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but violates protocol rules, e.g. a latitude
    /// outside ±90°.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The upgrade path does not name a realtime route.
    #[error("unknown route: {0}")]
    UnknownRoute(String),
}
