//! Wire protocol for the shuttle realtime server.
//!
//! - **Types** ([`Identity`], [`RoleCode`], [`GroupKey`], [`Route`],
//!   [`Presence`]): who is connected and to what.
//! - **Messages** ([`LocationUpdate`], [`ServerMessage`],
//!   [`StatusResponse`]): the frames that travel on the realtime channel.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (frames) → Session (identity) → Registry (fan-out)
//! ```

mod codec;
mod error;
mod messages;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{LocationBroadcast, LocationUpdate, ServerMessage, StatusResponse};
pub use types::{GroupKey, Identity, Presence, RoleCode, Route, UserId};
