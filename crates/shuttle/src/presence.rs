//! Per-user ordering of presence writes.
//!
//! Two connections of one user can each be publishing presence at the
//! same moment: the old one going offline while its replacement comes
//! online. Each publish first re-checks the connection registry and then
//! writes, all under the user's lock, so the last write always agrees
//! with who is actually connected.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

#[derive(Debug, Default)]
pub(crate) struct PresenceLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl PresenceLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `write` while holding the user's lock.
    pub(crate) async fn serialize<F, T>(&self, user_uuid: Uuid, write: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = self.entry(user_uuid);
        let out = {
            let _guard = lock.lock().await;
            write.await
        };
        drop(lock);
        self.release(user_uuid);
        out
    }

    fn entry(&self, user_uuid: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(user_uuid).or_default())
    }

    /// Drops the entry once nobody holds or awaits it.
    fn release(&self, user_uuid: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&user_uuid)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&user_uuid);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
