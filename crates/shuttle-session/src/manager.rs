//! The session manager: login, refresh, logout, and request
//! authentication.
//!
//! ```text
//! login() ──→ access + refresh ──→ refresh()/rotate() ──→ access (+ refresh)
//!                  │                       │
//!                  ▼                       ▼
//!            authenticate()          TooSoon / Invalid / Expired
//!                  │
//!                  ▼
//!              logout() ──→ access token on the denylist,
//!                           refresh record revoked
//! ```
//!
//! # Concurrency
//!
//! Two refreshes for the same user are serialized by a per-user async
//! lock, so the fetch-compare-replace sequence on the refresh record is
//! atomic with respect to other refreshes of that user. Different users
//! never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use shuttle_protocol::Identity;
use uuid::Uuid;

use crate::token::{strip_bearer, Claims, TokenIssuer, TokenKind};
use crate::{
    IssuedToken, RefreshOutcome, RefreshTokenRecord, RefreshTokenStore, RevocationList,
    SessionConfig, SessionError, TokenError, TokenPair,
};

/// Issues, refreshes, and revokes session tokens.
///
/// Shared behind an `Arc` by the realtime server and whatever HTTP layer
/// fronts login; every method takes `&self`.
pub struct SessionManager<S> {
    issuer: TokenIssuer,
    store: S,
    revoked: Arc<RevocationList>,
    config: SessionConfig,
    refresh_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: RefreshTokenStore> SessionManager<S> {
    /// Creates a manager.
    ///
    /// # Errors
    /// [`TokenError::InvalidKey`] if either key is unusable.
    pub fn new(
        signing_secret: &[u8],
        encryption_key: &[u8],
        store: S,
        config: SessionConfig,
    ) -> Result<Self, TokenError> {
        let issuer = TokenIssuer::new(signing_secret, encryption_key, config.tokens.clone())?;
        Ok(Self {
            issuer,
            store,
            revoked: Arc::new(RevocationList::new()),
            config,
            refresh_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn revocations(&self) -> &Arc<RevocationList> {
        &self.revoked
    }

    // -----------------------------------------------------------------------
    // Login / logout
    // -----------------------------------------------------------------------

    /// Mints an access/refresh pair for an identity the caller has
    /// already verified, and records the refresh token as the user's
    /// current one.
    pub async fn login(&self, identity: &Identity) -> Result<TokenPair, SessionError> {
        self.login_at(identity, SystemTime::now()).await
    }

    pub async fn login_at(
        &self,
        identity: &Identity,
        now: SystemTime,
    ) -> Result<TokenPair, SessionError> {
        let access = self.issuer.issue_access_at(identity, now)?;
        let refresh = self.issuer.issue_refresh_at(identity, now)?;
        self.store
            .save_or_replace(RefreshTokenRecord {
                id: Uuid::new_v4(),
                user_uuid: identity.user_uuid,
                token: refresh.token.clone(),
                issued_at: now,
                expires_at: refresh.expires_at(),
                ceiling: refresh.claims.ceiling(),
                revoked: false,
                last_used_at: None,
            })
            .await?;

        tracing::info!(user_uuid = %identity.user_uuid, role = %identity.role, "session created");
        Ok(TokenPair { access, refresh })
    }

    /// Ends a session: revokes the user's refresh record and puts the
    /// presented access token on the denylist.
    ///
    /// `raw_access` may carry a `Bearer ` prefix. Other access tokens of
    /// the same user are unaffected.
    pub async fn logout(&self, user_uuid: Uuid, raw_access: &str) -> Result<(), SessionError> {
        self.store.revoke(user_uuid).await?;
        self.invalidate_token(raw_access);
        tracing::info!(%user_uuid, "session ended");
        Ok(())
    }

    /// Puts a token on the denylist until it would have expired anyway.
    ///
    /// A token that cannot be read at all is listed for one access-token
    /// lifetime.
    pub fn invalidate_token(&self, raw: &str) {
        let token = strip_bearer(raw);
        let expires_at = match self.issuer.inspect(token) {
            Ok(claims) => claims.expires_at(),
            Err(_) => SystemTime::now() + self.issuer.config().access_ttl,
        };
        self.revoked.invalidate(token, expires_at);
    }

    /// Drops denylist entries for tokens that have expired.
    pub fn sweep_revocations(&self, now: SystemTime) -> usize {
        let removed = self.revoked.sweep(now);
        if removed > 0 {
            tracing::debug!(removed, "swept revoked tokens");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------

    /// Validates a request credential and returns its claims.
    ///
    /// Accepts a raw token or an `Authorization` value with `Bearer `.
    /// The denylist is consulted before the token is even decrypted, and
    /// only access tokens are accepted.
    pub fn authenticate(&self, credential: &str) -> Result<Claims, SessionError> {
        self.authenticate_at(credential, SystemTime::now())
    }

    pub fn authenticate_at(
        &self,
        credential: &str,
        now: SystemTime,
    ) -> Result<Claims, SessionError> {
        let token = strip_bearer(credential);
        if token.is_empty() {
            return Err(TokenError::Malformed.into());
        }
        if self.revoked.is_invalid(token) {
            tracing::warn!("revoked token presented");
            return Err(TokenError::Invalid("token revoked".into()).into());
        }
        self.issuer
            .validate_kind_at(token, TokenKind::Access, now)
            .map_err(|e| {
                tracing::warn!(error = %e, "token rejected");
                e.into()
            })
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Exchanges a refresh token for a new access token and a new
    /// refresh token. The presented refresh token stops working.
    pub async fn rotate(&self, presented: &str) -> Result<RefreshOutcome, SessionError> {
        self.rotate_at(presented, SystemTime::now()).await
    }

    pub async fn rotate_at(
        &self,
        presented: &str,
        now: SystemTime,
    ) -> Result<RefreshOutcome, SessionError> {
        self.refresh_at(presented, now, true).await
    }

    /// Exchanges a refresh token for a new access token only. The
    /// presented refresh token stays current.
    pub async fn refresh_access(&self, presented: &str) -> Result<RefreshOutcome, SessionError> {
        self.refresh_access_at(presented, SystemTime::now()).await
    }

    pub async fn refresh_access_at(
        &self,
        presented: &str,
        now: SystemTime,
    ) -> Result<RefreshOutcome, SessionError> {
        self.refresh_at(presented, now, false).await
    }

    async fn refresh_at(
        &self,
        presented: &str,
        now: SystemTime,
        rotate: bool,
    ) -> Result<RefreshOutcome, SessionError> {
        let token = strip_bearer(presented);
        let claims = self
            .issuer
            .validate_kind_at(token, TokenKind::Refresh, now)
            .inspect_err(|e| tracing::warn!(error = %e, "refresh token rejected"))?;
        let user_uuid = claims.user_uuid;

        let lock = self.refresh_lock(user_uuid);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(token, &claims, now, rotate).await
        };
        drop(lock);
        self.release_refresh_lock(user_uuid);

        if let Err(e) = &result {
            tracing::warn!(%user_uuid, error = %e, "refresh refused");
        }
        result
    }

    async fn refresh_locked(
        &self,
        token: &str,
        claims: &Claims,
        now: SystemTime,
        rotate: bool,
    ) -> Result<RefreshOutcome, SessionError> {
        let record = match self.store.fetch(claims.user_uuid).await {
            Ok(record) => record,
            Err(SessionError::NotFound(_)) => {
                return Err(TokenError::Invalid("no refresh token on record".into()).into());
            }
            Err(e) => return Err(e),
        };

        if record.token != token {
            return Err(TokenError::Invalid("refresh token superseded".into()).into());
        }
        if record.revoked {
            return Err(TokenError::Invalid("refresh token revoked".into()).into());
        }
        if now >= record.expires_at || record.ceiling.is_some_and(|c| now >= c) {
            return Err(TokenError::Expired.into());
        }
        if let Some(last) = record.last_used_at {
            let since = now.duration_since(last).unwrap_or(Duration::ZERO);
            if since < self.config.min_rotation_interval {
                return Err(SessionError::TooSoon);
            }
        }

        let identity = claims.identity();
        let access = self.issuer.issue_access_at(&identity, now)?;

        if !rotate {
            self.store.mark_used(claims.user_uuid, now).await?;
            tracing::info!(user_uuid = %claims.user_uuid, "access token refreshed");
            return Ok(RefreshOutcome {
                access,
                refresh: None,
            });
        }

        let refresh = self.issuer.rotate_refresh_at(token, now)?;
        self.store
            .save_or_replace(RefreshTokenRecord {
                id: record.id,
                user_uuid: record.user_uuid,
                token: refresh.token.clone(),
                issued_at: now,
                expires_at: refresh.expires_at(),
                ceiling: record.ceiling.or(refresh.claims.ceiling()),
                revoked: false,
                last_used_at: Some(now),
            })
            .await?;

        tracing::info!(user_uuid = %claims.user_uuid, "refresh token rotated");
        Ok(RefreshOutcome {
            access,
            refresh: Some(refresh),
        })
    }

    fn refresh_lock(&self, user_uuid: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(user_uuid).or_default())
    }

    /// Drops the user's lock entry once no refresh holds or awaits it.
    fn release_refresh_lock(&self, user_uuid: Uuid) {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if locks
            .get(&user_uuid)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&user_uuid);
        }
    }
}

impl<S> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("issuer", &self.issuer)
            .field("revoked", &self.revoked.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
