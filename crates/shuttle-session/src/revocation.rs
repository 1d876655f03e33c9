//! Denylist of revoked token strings.
//!
//! Entries are keyed by the exact token string and remember when the
//! token would have expired anyway. Once that moment passes the entry
//! can go, because validation would reject the token on expiry alone;
//! [`RevocationList::sweep`] does that pruning.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

/// Server-wide set of revoked tokens. Shared behind an `Arc` by every
/// connection task; safe for concurrent insert and lookup.
#[derive(Debug, Default)]
pub struct RevocationList {
    entries: Mutex<HashMap<String, SystemTime>>,
}

impl RevocationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revokes `token` until `expires_at`. Revoking twice keeps the later
    /// expiry.
    pub fn invalidate(&self, token: &str, expires_at: SystemTime) {
        let mut entries = self.lock();
        entries
            .entry(token.to_string())
            .and_modify(|at| *at = (*at).max(expires_at))
            .or_insert(expires_at);
    }

    pub fn is_invalid(&self, token: &str) -> bool {
        self.lock().contains_key(token)
    }

    /// Drops entries whose token has expired by `now`. Returns how many
    /// were removed.
    pub fn sweep(&self, now: SystemTime) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SystemTime>> {
        // Poisoning leaves the map intact.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
