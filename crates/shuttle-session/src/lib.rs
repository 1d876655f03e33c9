//! Session tokens for the shuttle server.
//!
//! This crate owns everything about "who is this request from":
//!
//! 1. **Token codec**: AES-GCM sealing ([`TokenCipher`]) around HS256
//!    signed claims ([`TokenIssuer`]).
//! 2. **Refresh**: rotation with an absolute ceiling and a guard window
//!    against double use ([`SessionManager::rotate`]).
//! 3. **Revocation**: a denylist of exact token strings, pruned once the
//!    tokens would have expired ([`RevocationList`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Realtime server (above)  ← authenticates upgrade requests
//!     ↕
//! Session Layer (this crate)  ← mints, refreshes, and revokes tokens
//!     ↕
//! Protocol Layer (below)  ← provides Identity, RoleCode
//! ```

#![allow(async_fn_in_trait)]

mod cipher;
mod error;
mod manager;
mod revocation;
mod session;
mod store;
pub mod token;

pub use cipher::TokenCipher;
pub use error::{SessionError, TokenError};
pub use manager::SessionManager;
pub use revocation::RevocationList;
pub use session::{IssuedToken, RefreshOutcome, SessionConfig, TokenPair};
pub use store::{MemoryRefreshStore, RefreshTokenRecord, RefreshTokenStore};
pub use token::{strip_bearer, Claims, TokenConfig, TokenIssuer, TokenKind};
