//! Session configuration and the values handed back to a client.

use std::time::{Duration, SystemTime};

use crate::token::{Claims, TokenConfig};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for the [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetimes of issued tokens.
    pub tokens: TokenConfig,

    /// Minimum gap between two uses of the same refresh token record.
    ///
    /// A second refresh inside this window is refused with
    /// [`SessionError::TooSoon`](crate::SessionError::TooSoon).
    /// Default: 1 second.
    pub min_rotation_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tokens: TokenConfig::default(),
            min_rotation_interval: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Issued tokens
// ---------------------------------------------------------------------------

/// A freshly minted token and the claims sealed inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    /// The opaque string the client presents.
    pub token: String,
    pub claims: Claims,
}

impl IssuedToken {
    /// When the token stops validating.
    pub fn expires_at(&self) -> SystemTime {
        self.claims.expires_at()
    }
}

/// What a successful login returns.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// What a successful refresh returns.
///
/// `refresh` is `None` when the caller asked for a new access token only
/// and the presented refresh token stays current.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub access: IssuedToken,
    pub refresh: Option<IssuedToken>,
}
