//! Error types for the session layer.
//!
//! [`TokenError`] comes out of the pure token code (cipher and issuer)
//! and never carries secrets. [`SessionError`] adds the failures that
//! need state: the refresh-token record, the rotation guard window, the
//! store itself.

use uuid::Uuid;

/// Why a token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Undecryptable or unparseable. Never retried.
    #[error("malformed token")]
    Malformed,

    /// Well formed and correctly signed, but past its expiry. A caller
    /// holding a valid refresh token can rotate; everyone else must log
    /// in again.
    #[error("token expired")]
    Expired,

    /// Bad signature, wrong kind, bad claims, revoked, or superseded.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Sealing the token failed.
    #[error("token encryption failed")]
    Encrypt,

    /// The configured key has an unusable length.
    #[error("invalid key length {0}")]
    InvalidKey(usize),
}

impl TokenError {
    /// HTTP status a caller should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Malformed | Self::Expired | Self::Invalid(_) => 401,
            Self::Encrypt | Self::InvalidKey(_) => 500,
        }
    }
}

/// Errors from the session manager and refresh-token stores.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token itself was refused.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A rotation was attempted inside the guard window.
    #[error("refresh attempted too soon after the previous one")]
    TooSoon,

    /// No refresh-token record exists for the user.
    #[error("no refresh token on record for user {0}")]
    NotFound(Uuid),

    /// The backing store failed.
    #[error("refresh token store failed: {0}")]
    Store(String),
}

impl SessionError {
    /// HTTP status a caller should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Token(e) => e.status_code(),
            Self::TooSoon => 429,
            Self::NotFound(_) => 401,
            Self::Store(_) => 500,
        }
    }

    /// `true` when the client should log in again rather than retry.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::Token(TokenError::Malformed | TokenError::Expired | TokenError::Invalid(_))
                | Self::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_distinguishes_backoff_from_auth_failure() {
        assert_eq!(SessionError::TooSoon.status_code(), 429);
        assert_eq!(SessionError::from(TokenError::Expired).status_code(), 401);
        assert_eq!(SessionError::Store("down".into()).status_code(), 500);
    }

    #[test]
    fn test_requires_login() {
        assert!(SessionError::from(TokenError::Invalid("revoked".into())).requires_login());
        assert!(!SessionError::TooSoon.requires_login());
        assert!(!SessionError::Store("down".into()).requires_login());
    }
}
