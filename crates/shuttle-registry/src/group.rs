//! Shuttle groups and fan-out broadcast.
//!
//! A group is the set of connections watching one shuttle. Broadcasts
//! take a snapshot of the members under the lock and deliver after
//! releasing it, so a slow or dead member never stalls joins, leaves, or
//! other broadcasts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shuttle_protocol::GroupKey;
use shuttle_transport::ConnectionId;
use uuid::Uuid;

use crate::LiveConnection;

type Members = HashMap<Uuid, LiveConnection>;

/// All groups, keyed by shuttle.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: Mutex<HashMap<GroupKey, Members>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn` to `group`, creating the group on first use.
    ///
    /// A user appears at most once per group. As in
    /// [`ConnectionRegistry::register`](crate::ConnectionRegistry::register),
    /// the later connection wins: an earlier entry of the same user is
    /// replaced and returned, and a `conn` older than the entry already
    /// present is told to close and returned without joining.
    pub fn join(&self, group: &GroupKey, conn: LiveConnection) -> Option<LiveConnection> {
        let user_uuid = conn.identity().user_uuid;
        let conn_id = conn.conn_id();

        let mut groups = self.lock();
        let members = groups.entry(group.clone()).or_default();
        if members.get(&user_uuid).is_some_and(|c| c.conn_id() > conn_id) {
            drop(groups);
            conn.close("superseded by a newer connection");
            tracing::debug!(%group, %user_uuid, %conn_id, "late join superseded");
            return Some(conn);
        }
        let previous = members.insert(user_uuid, conn);
        drop(groups);

        tracing::debug!(%group, %user_uuid, %conn_id, "joined group");
        previous
    }

    /// The user's entry in `group`, if any.
    pub fn member(&self, group: &GroupKey, user_uuid: Uuid) -> Option<LiveConnection> {
        self.lock()
            .get(group)
            .and_then(|m| m.get(&user_uuid))
            .cloned()
    }

    /// Removes the user from `group` if their entry still belongs to
    /// `conn_id`. Empty groups are dropped.
    pub fn leave(&self, group: &GroupKey, user_uuid: Uuid, conn_id: ConnectionId) -> bool {
        let mut groups = self.lock();
        let Some(members) = groups.get_mut(group) else {
            return false;
        };
        let owned = members
            .get(&user_uuid)
            .is_some_and(|c| c.conn_id() == conn_id);
        if owned {
            members.remove(&user_uuid);
            tracing::debug!(%group, %user_uuid, "left group");
        }
        if members.is_empty() {
            groups.remove(group);
            tracing::debug!(%group, "group emptied");
        }
        owned
    }

    /// Delivers `frame` to every member of `group`. Returns how many
    /// members it reached.
    pub fn broadcast(&self, group: &GroupKey, frame: &str) -> usize {
        self.deliver(group, None, frame)
    }

    /// Like [`broadcast`](Self::broadcast), skipping `sender`.
    pub fn broadcast_except(&self, group: &GroupKey, sender: Uuid, frame: &str) -> usize {
        self.deliver(group, Some(sender), frame)
    }

    pub fn members(&self, group: &GroupKey) -> Vec<Uuid> {
        self.lock()
            .get(group)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, group: &GroupKey, user_uuid: Uuid) -> bool {
        self.lock()
            .get(group)
            .is_some_and(|m| m.contains_key(&user_uuid))
    }

    pub fn group_count(&self) -> usize {
        self.lock().len()
    }

    fn deliver(&self, group: &GroupKey, skip: Option<Uuid>, frame: &str) -> usize {
        let targets: Vec<LiveConnection> = match self.lock().get(group) {
            Some(members) => members
                .iter()
                .filter(|(user, _)| Some(**user) != skip)
                .map(|(_, conn)| conn.clone())
                .collect(),
            None => return 0,
        };

        let frame: Arc<str> = Arc::from(frame);
        let mut delivered = 0;
        for conn in targets {
            match conn.send_frame(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        %group,
                        user_uuid = %conn.identity().user_uuid,
                        error = %e,
                        "broadcast delivery failed"
                    );
                }
            }
        }
        delivered
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<GroupKey, Members>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
