//! Persistence of the one current refresh token per user.
//!
//! The manager only needs four operations, captured by
//! [`RefreshTokenStore`]. [`MemoryRefreshStore`] backs tests and the
//! demo relay; a database-backed store implements the same trait.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use uuid::Uuid;

use crate::SessionError;

/// The stored state of a user's current refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_uuid: Uuid,
    /// The exact token string last handed to the client.
    pub token: String,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
    /// No rotation may extend `expires_at` past this.
    pub ceiling: Option<SystemTime>,
    pub revoked: bool,
    /// When the record was last used to mint tokens.
    pub last_used_at: Option<SystemTime>,
}

/// Keyed by user: saving a record for a user replaces any previous one.
///
/// # Example
///
/// ```rust
/// use shuttle_session::{MemoryRefreshStore, RefreshTokenStore, SessionError};
/// # use std::time::SystemTime;
/// # use uuid::Uuid;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), SessionError> {
/// let store = MemoryRefreshStore::new();
/// let user = Uuid::new_v4();
/// assert!(matches!(store.fetch(user).await, Err(SessionError::NotFound(_))));
/// # Ok(())
/// # }
/// ```
pub trait RefreshTokenStore: Send + Sync + 'static {
    /// Stores `record` as the user's current refresh token, replacing
    /// any previous record.
    fn save_or_replace(
        &self,
        record: RefreshTokenRecord,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;

    /// Returns the user's current record, or [`SessionError::NotFound`].
    fn fetch(
        &self,
        user_uuid: Uuid,
    ) -> impl std::future::Future<Output = Result<RefreshTokenRecord, SessionError>> + Send;

    /// Marks the user's record revoked. Revoking a user without a record
    /// is not an error.
    fn revoke(
        &self,
        user_uuid: Uuid,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;

    /// Stamps the user's record with its latest use.
    fn mark_used(
        &self,
        user_uuid: Uuid,
        at: SystemTime,
    ) -> impl std::future::Future<Output = Result<(), SessionError>> + Send;
}

/// In-process [`RefreshTokenStore`].
#[derive(Debug, Default)]
pub struct MemoryRefreshStore {
    records: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
}

impl MemoryRefreshStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, RefreshTokenRecord>> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl RefreshTokenStore for MemoryRefreshStore {
    async fn save_or_replace(&self, record: RefreshTokenRecord) -> Result<(), SessionError> {
        self.lock().insert(record.user_uuid, record);
        Ok(())
    }

    async fn fetch(&self, user_uuid: Uuid) -> Result<RefreshTokenRecord, SessionError> {
        self.lock()
            .get(&user_uuid)
            .cloned()
            .ok_or(SessionError::NotFound(user_uuid))
    }

    async fn revoke(&self, user_uuid: Uuid) -> Result<(), SessionError> {
        if let Some(record) = self.lock().get_mut(&user_uuid) {
            record.revoked = true;
        }
        Ok(())
    }

    async fn mark_used(&self, user_uuid: Uuid, at: SystemTime) -> Result<(), SessionError> {
        let mut records = self.lock();
        let record = records
            .get_mut(&user_uuid)
            .ok_or(SessionError::NotFound(user_uuid))?;
        record.last_used_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(user_uuid: Uuid, token: &str) -> RefreshTokenRecord {
        let now = SystemTime::now();
        RefreshTokenRecord {
            id: Uuid::new_v4(),
            user_uuid,
            token: token.to_string(),
            issued_at: now,
            expires_at: now + Duration::from_secs(60),
            ceiling: Some(now + Duration::from_secs(60)),
            revoked: false,
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_or_replace_keeps_one_record_per_user() {
        let store = MemoryRefreshStore::new();
        let user = Uuid::new_v4();

        store.save_or_replace(record(user, "first")).await.unwrap();
        store.save_or_replace(record(user, "second")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch(user).await.unwrap().token, "second");
    }

    #[tokio::test]
    async fn test_fetch_unknown_user_returns_not_found() {
        let store = MemoryRefreshStore::new();
        let user = Uuid::new_v4();
        assert!(matches!(
            store.fetch(user).await,
            Err(SessionError::NotFound(u)) if u == user
        ));
    }

    #[tokio::test]
    async fn test_revoke_marks_record_and_tolerates_missing() {
        let store = MemoryRefreshStore::new();
        let user = Uuid::new_v4();
        store.revoke(user).await.unwrap();

        store.save_or_replace(record(user, "tok")).await.unwrap();
        store.revoke(user).await.unwrap();
        assert!(store.fetch(user).await.unwrap().revoked);
    }

    #[tokio::test]
    async fn test_mark_used_stamps_record() {
        let store = MemoryRefreshStore::new();
        let user = Uuid::new_v4();
        let at = SystemTime::now();

        assert!(store.mark_used(user, at).await.is_err());
        store.save_or_replace(record(user, "tok")).await.unwrap();
        store.mark_used(user, at).await.unwrap();
        assert_eq!(store.fetch(user).await.unwrap().last_used_at, Some(at));
    }
}
