//! The user directory: what the realtime server needs from the rest of
//! the platform.
//!
//! Users, shuttles, and stakeholder relationships live elsewhere (a
//! database behind the HTTP API). The server only asks three questions
//! of it, captured by [`Directory`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use shuttle_protocol::{GroupKey, Identity, Presence};
use shuttle_session::Claims;
use uuid::Uuid;

/// Errors returned by a [`Directory`].
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The token names a user the directory does not know.
    #[error("user {0} not found")]
    UserNotFound(Uuid),

    /// The directory could not be reached.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Identity lookup, presence, and shuttle membership.
///
/// # Example
///
/// ```rust
/// use shuttle::{Directory, InMemoryDirectory};
/// use shuttle_protocol::{GroupKey, Identity, RoleCode, UserId};
/// use uuid::Uuid;
///
/// let directory = InMemoryDirectory::new();
/// let driver = Identity {
///     user_id: UserId(1),
///     user_uuid: Uuid::new_v4(),
///     display_name: "Sari".into(),
///     role: RoleCode::Driver,
/// };
/// let shuttle = GroupKey::new("shuttle-1").unwrap();
/// directory.insert_user(driver.clone());
/// directory.add_member(&shuttle, driver.user_uuid);
/// ```
pub trait Directory: Send + Sync + 'static {
    /// Resolves the identity a validated token refers to.
    fn lookup_identity(
        &self,
        claims: &Claims,
    ) -> impl std::future::Future<Output = Result<Identity, DirectoryError>> + Send;

    /// Records a user's online/offline status.
    fn update_presence(
        &self,
        identity: &Identity,
        presence: Presence,
        at: SystemTime,
    ) -> impl std::future::Future<Output = Result<(), DirectoryError>> + Send;

    /// Whether the user is a stakeholder of the shuttle.
    fn is_group_member(
        &self,
        identity: &Identity,
        group: &GroupKey,
    ) -> impl std::future::Future<Output = Result<bool, DirectoryError>> + Send;
}

impl<D: Directory> Directory for Arc<D> {
    async fn lookup_identity(&self, claims: &Claims) -> Result<Identity, DirectoryError> {
        (**self).lookup_identity(claims).await
    }

    async fn update_presence(
        &self,
        identity: &Identity,
        presence: Presence,
        at: SystemTime,
    ) -> Result<(), DirectoryError> {
        (**self).update_presence(identity, presence, at).await
    }

    async fn is_group_member(
        &self,
        identity: &Identity,
        group: &GroupKey,
    ) -> Result<bool, DirectoryError> {
        (**self).is_group_member(identity, group).await
    }
}

// ---------------------------------------------------------------------------
// InMemoryDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, Identity>,
    members: HashMap<GroupKey, HashSet<Uuid>>,
    presence: HashMap<Uuid, (Presence, SystemTime)>,
}

/// A [`Directory`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    tables: Mutex<Tables>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, identity: Identity) {
        self.lock().users.insert(identity.user_uuid, identity);
    }

    /// Makes the user a stakeholder of the shuttle.
    pub fn add_member(&self, group: &GroupKey, user_uuid: Uuid) {
        self.lock()
            .members
            .entry(group.clone())
            .or_default()
            .insert(user_uuid);
    }

    /// The last recorded presence and when it was set.
    pub fn presence(&self, user_uuid: Uuid) -> Option<(Presence, SystemTime)> {
        self.lock().presence.get(&user_uuid).copied()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Directory for InMemoryDirectory {
    async fn lookup_identity(&self, claims: &Claims) -> Result<Identity, DirectoryError> {
        self.lock()
            .users
            .get(&claims.user_uuid)
            .cloned()
            .ok_or(DirectoryError::UserNotFound(claims.user_uuid))
    }

    async fn update_presence(
        &self,
        identity: &Identity,
        presence: Presence,
        at: SystemTime,
    ) -> Result<(), DirectoryError> {
        self.lock()
            .presence
            .insert(identity.user_uuid, (presence, at));
        Ok(())
    }

    async fn is_group_member(
        &self,
        identity: &Identity,
        group: &GroupKey,
    ) -> Result<bool, DirectoryError> {
        Ok(self
            .lock()
            .members
            .get(group)
            .is_some_and(|m| m.contains(&identity.user_uuid)))
    }
}

#[cfg(test)]
mod tests {
    use shuttle_protocol::{RoleCode, UserId};
    use shuttle_session::TokenKind;

    use super::*;

    fn parent() -> Identity {
        Identity {
            user_id: UserId(5),
            user_uuid: Uuid::from_u128(5),
            display_name: "Dewi".into(),
            role: RoleCode::Parent,
        }
    }

    fn claims_for(identity: &Identity) -> Claims {
        Claims {
            sub: identity.user_id,
            user_uuid: identity.user_uuid,
            user_name: identity.display_name.clone(),
            role_code: identity.role,
            typ: TokenKind::Access,
            jti: "j".into(),
            iat: 0,
            exp: 1,
            abs_exp: None,
        }
    }

    #[tokio::test]
    async fn test_lookup_identity_unknown_user_fails() {
        let directory = InMemoryDirectory::new();
        let result = directory.lookup_identity(&claims_for(&parent())).await;
        assert!(matches!(result, Err(DirectoryError::UserNotFound(_))));

        directory.insert_user(parent());
        assert_eq!(
            directory.lookup_identity(&claims_for(&parent())).await.unwrap(),
            parent()
        );
    }

    #[tokio::test]
    async fn test_is_group_member() {
        let directory = InMemoryDirectory::new();
        let shuttle = GroupKey::new("s1").unwrap();
        assert!(!directory.is_group_member(&parent(), &shuttle).await.unwrap());

        directory.add_member(&shuttle, parent().user_uuid);
        assert!(directory.is_group_member(&parent(), &shuttle).await.unwrap());
        assert!(!directory
            .is_group_member(&parent(), &GroupKey::new("s2").unwrap())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_update_presence_records_latest() {
        let directory = Arc::new(InMemoryDirectory::new());
        let at = SystemTime::now();
        directory
            .update_presence(&parent(), Presence::Online, at)
            .await
            .unwrap();
        assert_eq!(directory.presence(parent().user_uuid), Some((Presence::Online, at)));
    }
}
