//! Error types for the registry layer.

use shuttle_transport::ConnectionId;
use uuid::Uuid;

/// Errors that can occur when delivering through a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No live connection is registered for the user.
    #[error("user {0} is not connected")]
    NotConnected(Uuid),

    /// The connection's outbound queue is full: its peer is not reading.
    #[error("connection {0} is not keeping up")]
    QueueFull(ConnectionId),

    /// The connection's task has gone away and its queue is closed.
    #[error("connection {0} is closed")]
    ChannelClosed(ConnectionId),
}
