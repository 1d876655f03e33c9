//! Unified error type for the shuttle server.

use shuttle_protocol::ProtocolError;
use shuttle_registry::RegistryError;
use shuttle_session::{SessionError, TokenError};
use shuttle_transport::TransportError;

use crate::{ConfigError, DirectoryError};

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ShuttleError {
    /// A transport-level error (accept, upgrade, handshake timeout, send,
    /// recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, unknown route).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (token refused, refresh too soon, store).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A registry-level error (not connected, queue closed).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The user directory failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Configuration is missing or invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<TokenError> for ShuttleError {
    fn from(e: TokenError) -> Self {
        Self::Session(e.into())
    }
}
