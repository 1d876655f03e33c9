use std::time::Duration;

/// Errors that can occur in the transport layer.
///
/// Accept and upgrade failures concern a single peer. The server logs
/// them and keeps accepting; they never end the accept loop.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer did not finish its upgrade in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The WebSocket upgrade handshake failed.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),
}
