//! Transport layer for the shuttle realtime server.
//!
//! Provides the [`Transport`], [`Handshake`] and [`Connection`] traits
//! plus the [`UpgradeRequest`] captured while a client's HTTP upgrade is
//! accepted. The upgrade request is the only place the realtime endpoint
//! sees HTTP: the route path (which carries the optional shuttle id) and
//! the `Authorization` header.
//!
//! # Accepting connections
//!
//! Accepting is split in two steps:
//!
//! ```text
//! Transport::accept() ──→ Handshake ──upgrade()──→ Connection
//!   (TCP accept only)       (per-connection task)
//! ```
//!
//! [`Transport::accept`] returns as soon as the TCP connection exists.
//! The HTTP upgrade happens in [`Handshake::upgrade`], which callers run
//! on the connection's own task and usually bound with a timeout. A peer
//! that opens a socket and never sends its upgrade request then only
//! ever occupies its own task, and the accept loop keeps serving
//! everyone else.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{PendingUpgrade, WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Opaque identifier for a connection.
///
/// Ids are handed out in accept order, so a larger id is a connection
/// that arrived later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// What the client asked for when it upgraded to a realtime channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request path, e.g. `/ws` or `/ws/7f1c…`.
    pub path: String,
    /// Raw `Authorization` header value, if present.
    pub authorization: Option<String>,
    /// `token` query parameter, for clients that cannot set headers
    /// on a WebSocket upgrade (browsers).
    pub query_token: Option<String>,
}

impl UpgradeRequest {
    /// Builds an `UpgradeRequest` from a request target (`path?query`)
    /// and an optional `Authorization` header.
    pub fn from_target(target: &str, authorization: Option<String>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        let query_token = query.and_then(|q| {
            q.split('&').find_map(|pair| match pair.split_once('=') {
                Some(("token", value)) if !value.is_empty() => {
                    Some(value.to_string())
                }
                _ => None,
            })
        });
        Self {
            path: path.to_string(),
            authorization,
            query_token,
        }
    }

    /// The credential the client presented: the header wins over the
    /// query parameter.
    pub fn credential(&self) -> Option<&str> {
        self.authorization
            .as_deref()
            .or(self.query_token.as_deref())
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// An accepted connection that still has to complete its upgrade.
    type Pending: Handshake<Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next incoming connection.
    ///
    /// This never waits on the peer beyond the TCP accept itself.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// The protocol upgrade of an accepted connection.
pub trait Handshake: Send + 'static {
    /// The connection produced once the upgrade completes.
    type Connection: Connection;
    /// The error type for the upgrade.
    type Error: std::error::Error + Send + Sync;

    /// The id the finished connection will carry.
    fn id(&self) -> ConnectionId;

    /// Runs the upgrade. Waits on the peer for as long as it takes, so
    /// callers bound it with a timeout.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive frames.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends binary data to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Sends a text frame to the remote peer.
    async fn send_text(&self, text: &str) -> Result<(), Self::Error>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// The upgrade request this connection was accepted with.
    fn request(&self) -> &UpgradeRequest;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_orders_by_accept_order() {
        assert!(ConnectionId::new(2) > ConnectionId::new(1));
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_upgrade_request_from_target_splits_path_and_token() {
        let req = UpgradeRequest::from_target("/ws/s1?foo=1&token=abc", None);
        assert_eq!(req.path, "/ws/s1");
        assert_eq!(req.query_token.as_deref(), Some("abc"));
        assert_eq!(req.credential(), Some("abc"));
    }

    #[test]
    fn test_upgrade_request_from_target_without_query() {
        let req = UpgradeRequest::from_target("/ws", None);
        assert_eq!(req.path, "/ws");
        assert!(req.query_token.is_none());
        assert!(req.credential().is_none());
    }

    #[test]
    fn test_upgrade_request_credential_prefers_header() {
        let req = UpgradeRequest::from_target(
            "/ws?token=from-query",
            Some("Bearer from-header".into()),
        );
        assert_eq!(req.credential(), Some("Bearer from-header"));
    }

    #[test]
    fn test_upgrade_request_empty_token_is_ignored() {
        let req = UpgradeRequest::from_target("/ws?token=", None);
        assert!(req.query_token.is_none());
    }
}
