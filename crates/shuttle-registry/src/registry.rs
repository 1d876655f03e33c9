//! Connection registry: at most one live connection per user.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use shuttle_transport::ConnectionId;
use uuid::Uuid;

use crate::{LiveConnection, RegistryError};

/// Maps each user to their single live connection.
///
/// When two connections of one user meet, the one accepted later (the
/// larger [`ConnectionId`]) wins and the other is told to close. The
/// rule does not depend on which `register` call runs first, and
/// [`GroupRegistry::join`](crate::GroupRegistry::join) applies the same
/// rule, so two racing connects always leave the same connection in
/// both registries.
///
/// Unregistering is keyed by both user and connection id, so a
/// connection that was displaced cannot remove its replacement on the
/// way out.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Uuid, LiveConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers `conn` as the user's live connection.
    ///
    /// Returns the connection that lost and was told to close: the
    /// previous one, or `conn` itself if a later connection is already
    /// registered.
    pub fn register(&self, conn: LiveConnection) -> Option<LiveConnection> {
        let user_uuid = conn.identity().user_uuid;
        let conn_id = conn.conn_id();

        let mut connections = self.lock();
        let newer = connections
            .get(&user_uuid)
            .map(LiveConnection::conn_id)
            .filter(|current| *current > conn_id);
        if let Some(newer) = newer {
            drop(connections);
            conn.close("superseded by a newer connection");
            tracing::info!(%user_uuid, %conn_id, %newer, "late registration superseded");
            return Some(conn);
        }
        let previous = connections.insert(user_uuid, conn);
        drop(connections);

        if let Some(old) = &previous {
            old.close("replaced by a newer connection");
            tracing::info!(
                %user_uuid,
                old = %old.conn_id(),
                new = %conn_id,
                "replaced existing connection"
            );
        } else {
            tracing::debug!(%user_uuid, %conn_id, "connection registered");
        }
        previous
    }

    /// `true` if `conn_id` is the user's live connection.
    pub fn is_current(&self, user_uuid: Uuid, conn_id: ConnectionId) -> bool {
        self.lock()
            .get(&user_uuid)
            .is_some_and(|c| c.conn_id() == conn_id)
    }

    /// Removes the user's entry if it still belongs to `conn_id`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, user_uuid: Uuid, conn_id: ConnectionId) -> bool {
        let mut connections = self.lock();
        let owned = connections
            .get(&user_uuid)
            .is_some_and(|c| c.conn_id() == conn_id);
        if owned {
            connections.remove(&user_uuid);
            tracing::debug!(%user_uuid, %conn_id, "connection unregistered");
        }
        owned
    }

    pub fn lookup(&self, user_uuid: Uuid) -> Option<LiveConnection> {
        self.lock().get(&user_uuid).cloned()
    }

    /// Queues a frame on the user's live connection.
    pub fn send_to(&self, user_uuid: Uuid, frame: &str) -> Result<(), RegistryError> {
        let conn = self
            .lookup(user_uuid)
            .ok_or(RegistryError::NotConnected(user_uuid))?;
        conn.send_frame(frame)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, LiveConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
