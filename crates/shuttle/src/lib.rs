//! # Shuttle
//!
//! Realtime backend for school-shuttle tracking.
//!
//! Clients authenticate with an encrypted access token and open a
//! WebSocket channel: `/ws` for a personal channel, `/ws/{shuttle}` to
//! join a shuttle's group. Location updates sent on a group channel are
//! fanned out to every other member, and each user's online/offline
//! presence is reported to the [`Directory`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shuttle::prelude::*;
//!
//! # async fn run() -> Result<(), ShuttleError> {
//! let server = ShuttleServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .secrets(b"a-signing-secret-of-at-least-32-bytes", b"0123456789abcdef")
//!     .build(InMemoryDirectory::new(), MemoryRefreshStore::new())
//!     .await?;
//! server.run().await
//! # }
//! ```

#![allow(async_fn_in_trait)]

mod config;
mod directory;
mod error;
mod handler;
mod presence;
mod server;

pub use config::{ConfigError, ServerConfig, MIN_SECRET_LEN};
pub use directory::{Directory, DirectoryError, InMemoryDirectory};
pub use error::ShuttleError;
pub use server::{ShuttleServer, ShuttleServerBuilder};

/// Re-exports for building and running a server.
pub mod prelude {
    pub use crate::{
        ConfigError, Directory, DirectoryError, InMemoryDirectory, ServerConfig, ShuttleError,
        ShuttleServer, ShuttleServerBuilder,
    };
    pub use shuttle_protocol::{
        GroupKey, Identity, LocationBroadcast, LocationUpdate, Presence, RoleCode, Route,
        ServerMessage, StatusResponse, UserId,
    };
    pub use shuttle_registry::{ConnectionRegistry, GroupRegistry};
    pub use shuttle_session::{
        Claims, MemoryRefreshStore, RefreshTokenStore, SessionConfig, SessionError,
        SessionManager, TokenConfig, TokenError, TokenPair,
    };
}
