//! Live connection tracking for the shuttle realtime server.
//!
//! - [`ConnectionRegistry`]: one live connection per user, displacing
//!   the older one on reconnect.
//! - [`GroupRegistry`]: connections grouped by shuttle, with fan-out
//!   broadcast.
//!
//! Both hold [`LiveConnection`] handles, never sockets. Each socket is
//! owned by its connection task, which drains an [`OutboundReceiver`].
//! Both also resolve a clash between two connections of one user the
//! same way: the later [`ConnectionId`](shuttle_transport::ConnectionId)
//! wins.

mod connection;
mod error;
mod group;
mod registry;

pub use connection::{LiveConnection, OUTBOUND_CAPACITY, Outbound, OutboundReceiver};
pub use error::RegistryError;
pub use group::GroupRegistry;
pub use registry::ConnectionRegistry;
