//! Frames exchanged on the realtime channel.
//!
//! Inbound, a client sends exactly one shape:
//!
//! ```json
//! { "latitude": -6.2, "longitude": 106.8 }
//! ```
//!
//! Outbound, the server sends a [`ServerMessage`], which is either a
//! location broadcast from another group member or a status frame:
//!
//! ```json
//! { "user_uuid": "…", "latitude": -6.2, "longitude": 106.8 }
//! { "code": 200, "status": "OK", "message": "Message broadcasted" }
//! ```
//!
//! Every struct here uses `deny_unknown_fields`, so a frame matches at
//! most one shape and anything else is rejected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A vehicle position reported by a client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationUpdate {
    /// Checks the coordinates are finite and on the globe.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ProtocolError::InvalidMessage(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !self.longitude.is_finite()
            || !(-180.0..=180.0).contains(&self.longitude)
        {
            return Err(ProtocolError::InvalidMessage(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A location fanned out to the members of a shuttle group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationBroadcast {
    /// Who reported the position.
    pub user_uuid: Uuid,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationBroadcast {
    /// Attributes an inbound update to its sender.
    pub fn from_update(user_uuid: Uuid, update: LocationUpdate) -> Self {
        Self {
            user_uuid,
            latitude: update.latitude,
            longitude: update.longitude,
        }
    }
}

/// The structured `{code, status, message}` response.
///
/// `code` follows HTTP conventions and `status` is its reason phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusResponse {
    pub code: u16,
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    /// Builds a response, filling `status` from `code`.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            status: reason_phrase(code).to_string(),
            message: message.into(),
        }
    }

    /// `200 OK`.
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(200, message)
    }

    /// `400 Bad Request`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// `401 Unauthorized`.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, message)
    }

    /// `404 Not Found`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }

    /// `503 Service Unavailable`.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(503, message)
    }

    /// `true` for 4xx and 5xx codes.
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }
}

fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        409 => "Conflict",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Everything the server can send on a realtime channel.
///
/// On the wire this is untagged; the variant is recovered from the
/// frame's shape, and for status frames from the code (`< 400` is an
/// ack, anything else an error).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub enum ServerMessage {
    /// Another member's position.
    Location(LocationBroadcast),
    /// A success response.
    Ack(StatusResponse),
    /// A failure response.
    Error(StatusResponse),
}

impl ServerMessage {
    /// Wraps a status response in the matching variant.
    pub fn status(response: StatusResponse) -> Self {
        if response.is_error() {
            Self::Error(response)
        } else {
            Self::Ack(response)
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireMessage {
    Location(LocationBroadcast),
    Status(StatusResponse),
}

impl From<WireMessage> for ServerMessage {
    fn from(wire: WireMessage) -> Self {
        match wire {
            WireMessage::Location(loc) => Self::Location(loc),
            WireMessage::Status(status) => Self::status(status),
        }
    }
}

impl From<ServerMessage> for WireMessage {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Location(loc) => Self::Location(loc),
            ServerMessage::Ack(status) | ServerMessage::Error(status) => {
                Self::Status(status)
            }
        }
    }
}
