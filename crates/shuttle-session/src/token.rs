//! Signed, encrypted session tokens.
//!
//! A token is built in two layers:
//!
//! ```text
//! claims ──JSON──→ header.payload.signature   (HS256 compact JWS)
//!        ──AES-GCM──→ base64url(nonce || ciphertext)
//! ```
//!
//! Validation peels them in reverse: decrypt, check the header names
//! HS256, verify the MAC in constant time, parse the claims, check
//! expiry. Only HS256 is ever accepted; a token naming any other
//! algorithm is invalid even if it decrypts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use shuttle_protocol::{Identity, RoleCode, UserId};
use uuid::Uuid;

use crate::{IssuedToken, TokenCipher, TokenError};

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Whether a token grants access or only the right to mint new tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The payload sealed inside every token.
///
/// Times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub user_uuid: Uuid,
    pub user_name: String,
    pub role_code: RoleCode,
    pub typ: TokenKind,
    /// Unique per token, so two tokens minted in the same second for the
    /// same user still differ.
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
    /// Refresh tokens only: the absolute ceiling no rotation may extend
    /// past.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_exp: Option<u64>,
}

impl Claims {
    /// The identity the token was issued to.
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.sub,
            user_uuid: self.user_uuid,
            display_name: self.user_name.clone(),
            role: self.role_code,
        }
    }

    pub fn expires_at(&self) -> SystemTime {
        from_unix(self.exp)
    }

    pub fn ceiling(&self) -> Option<SystemTime> {
        self.abs_exp.map(from_unix)
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

// ---------------------------------------------------------------------------
// TokenConfig
// ---------------------------------------------------------------------------

/// Token lifetimes.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Default: 2 hours.
    pub access_ttl: Duration,
    /// Lifetime of a refresh token minted at login, which is also its
    /// absolute ceiling. Default: 15 days.
    pub refresh_ttl: Duration,
    /// Lifetime granted by each rotation, capped by the ceiling.
    /// Default: 7 days.
    pub rotated_refresh_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(2 * 60 * 60),
            refresh_ttl: Duration::from_secs(15 * 24 * 60 * 60),
            rotated_refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// TokenIssuer
// ---------------------------------------------------------------------------

/// Mints and validates tokens. Holds only keys and configuration, so it
/// is freely shared between tasks.
pub struct TokenIssuer {
    cipher: TokenCipher,
    signing_key: Vec<u8>,
    config: TokenConfig,
}

impl TokenIssuer {
    /// Creates an issuer from a signing secret and an encryption key.
    ///
    /// # Errors
    /// [`TokenError::InvalidKey`] if the secret is empty or the
    /// encryption key is neither 16 nor 32 bytes.
    pub fn new(
        signing_secret: &[u8],
        encryption_key: &[u8],
        config: TokenConfig,
    ) -> Result<Self, TokenError> {
        if signing_secret.is_empty() {
            return Err(TokenError::InvalidKey(0));
        }
        Ok(Self {
            cipher: TokenCipher::new(encryption_key)?,
            signing_key: signing_secret.to_vec(),
            config,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn issue_access(&self, identity: &Identity) -> Result<IssuedToken, TokenError> {
        self.issue_access_at(identity, SystemTime::now())
    }

    pub fn issue_access_at(
        &self,
        identity: &Identity,
        now: SystemTime,
    ) -> Result<IssuedToken, TokenError> {
        let iat = unix_secs(now);
        let exp = iat.saturating_add(self.config.access_ttl.as_secs());
        self.mint(identity, TokenKind::Access, iat, exp, None)
    }

    pub fn issue_refresh(&self, identity: &Identity) -> Result<IssuedToken, TokenError> {
        self.issue_refresh_at(identity, SystemTime::now())
    }

    /// Mints a refresh token whose expiry is also its absolute ceiling.
    pub fn issue_refresh_at(
        &self,
        identity: &Identity,
        now: SystemTime,
    ) -> Result<IssuedToken, TokenError> {
        let iat = unix_secs(now);
        let exp = iat.saturating_add(self.config.refresh_ttl.as_secs());
        self.mint(identity, TokenKind::Refresh, iat, exp, Some(exp))
    }

    pub fn rotate_refresh(&self, presented: &str) -> Result<IssuedToken, TokenError> {
        self.rotate_refresh_at(presented, SystemTime::now())
    }

    /// Validates a refresh token and mints its successor.
    ///
    /// The new expiry is `now + rotated_refresh_ttl`, capped by the
    /// ceiling carried in the old token. A token without a ceiling has
    /// one established at its current expiry. The presented token must
    /// be discarded by the caller; only the returned one is current.
    ///
    /// With the default lifetimes (15 day login, 7 day rotation):
    ///
    /// ```text
    /// day 0   login        exp = 15, abs_exp = 15
    /// day 5   rotate       exp = min(5 + 7, 15)  = 12
    /// day 10  rotate       exp = min(10 + 7, 15) = 15
    /// day 15  rotate       Expired
    /// ```
    ///
    /// The ceiling travels inside each rotated token unchanged, so
    /// rotating often keeps a session alive until the ceiling and never
    /// beyond it.
    pub fn rotate_refresh_at(
        &self,
        presented: &str,
        now: SystemTime,
    ) -> Result<IssuedToken, TokenError> {
        let old = self.validate_kind_at(presented, TokenKind::Refresh, now)?;
        let ceiling = old.abs_exp.unwrap_or(old.exp);
        let iat = unix_secs(now);
        if iat >= ceiling {
            return Err(TokenError::Expired);
        }
        let exp = iat
            .saturating_add(self.config.rotated_refresh_ttl.as_secs())
            .min(ceiling);
        self.mint(&old.identity(), TokenKind::Refresh, iat, exp, Some(ceiling))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, SystemTime::now())
    }

    /// Decrypts, verifies, and checks expiry.
    pub fn validate_at(&self, token: &str, now: SystemTime) -> Result<Claims, TokenError> {
        let claims = self.inspect(token)?;
        if unix_secs(now) >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    pub fn validate_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, TokenError> {
        self.validate_kind_at(token, kind, SystemTime::now())
    }

    /// Like [`validate_at`](Self::validate_at), and also requires the
    /// token to be of the given kind.
    pub fn validate_kind_at(
        &self,
        token: &str,
        kind: TokenKind,
        now: SystemTime,
    ) -> Result<Claims, TokenError> {
        let claims = self.validate_at(token, now)?;
        if claims.typ != kind {
            return Err(TokenError::Invalid(format!(
                "expected {kind:?} token, got {:?}",
                claims.typ
            )));
        }
        Ok(claims)
    }

    /// Decrypts and verifies a token without checking expiry.
    ///
    /// Used when revoking a token: an expired token still needs its
    /// claims read so the revocation entry knows when it can be dropped.
    pub fn inspect(&self, token: &str) -> Result<Claims, TokenError> {
        let plaintext = self.cipher.decrypt(token)?;
        let compact = std::str::from_utf8(&plaintext).map_err(|_| TokenError::Malformed)?;

        let mut parts = compact.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != ALG {
            return Err(TokenError::Invalid(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signing_input = &compact[..header_b64.len() + 1 + payload_b64.len()];
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::Invalid("signature mismatch".into()))?;

        let claims: Claims = decode_segment(payload_b64)
            .map_err(|_| TokenError::Invalid("unreadable claims".into()))?;
        if claims.iat > claims.exp {
            return Err(TokenError::Invalid("issued after expiry".into()));
        }
        if claims.abs_exp.is_some_and(|ceiling| claims.exp > ceiling) {
            return Err(TokenError::Invalid("expiry past ceiling".into()));
        }
        Ok(claims)
    }

    fn mint(
        &self,
        identity: &Identity,
        typ: TokenKind,
        iat: u64,
        exp: u64,
        abs_exp: Option<u64>,
    ) -> Result<IssuedToken, TokenError> {
        let claims = Claims {
            sub: identity.user_id,
            user_uuid: identity.user_uuid,
            user_name: identity.display_name.clone(),
            role_code: identity.role,
            typ,
            jti: Uuid::new_v4().simple().to_string(),
            iat,
            exp,
            abs_exp,
        };
        let compact = self.sign(&claims)?;
        let token = self.cipher.encrypt(compact.as_bytes())?;
        Ok(IssuedToken { token, claims })
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: ALG.to_string(),
            typ: Some("JWT".to_string()),
        };
        let mut compact = format!("{}.{}", encode_segment(&header)?, encode_segment(claims)?);
        let mut mac = self.mac()?;
        mac.update(compact.as_bytes());
        let signature = mac.finalize().into_bytes();
        compact.push('.');
        compact.push_str(&URL_SAFE_NO_PAD.encode(signature));
        Ok(compact)
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| TokenError::InvalidKey(self.signing_key.len()))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("cipher", &self.cipher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Strips an optional `Bearer ` scheme from an `Authorization` value.
pub fn strip_bearer(header: &str) -> &str {
    let header = header.trim();
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|_| TokenError::Encrypt)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

pub(crate) fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn from_unix(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-signing-secret-at-least-32-bytes!!";
    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET, KEY, TokenConfig::default()).unwrap()
    }

    fn driver() -> Identity {
        Identity {
            user_id: UserId(7),
            user_uuid: Uuid::from_u128(0x67e5_5044_10b1_426f_9247_bb68_0e5f_e0c8),
            display_name: "Budi".into(),
            role: RoleCode::Driver,
        }
    }

    fn t0() -> SystemTime {
        from_unix(1_700_000_000)
    }

    // =========================================================================
    // Issue / validate
    // =========================================================================

    #[test]
    fn test_issue_access_validates_with_same_claims() {
        let issuer = issuer();
        let issued = issuer.issue_access_at(&driver(), t0()).unwrap();

        let claims = issuer.validate_at(&issued.token, t0()).unwrap();
        assert_eq!(claims, issued.claims);
        assert_eq!(claims.identity(), driver());
        assert_eq!(claims.typ, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 2 * 60 * 60);
    }

    #[test]
    fn test_validate_expires_exactly_at_exp() {
        let issuer = issuer();
        let issued = issuer.issue_access_at(&driver(), t0()).unwrap();
        let ttl = issuer.config().access_ttl;

        assert!(issuer
            .validate_at(&issued.token, t0() + ttl - Duration::from_secs(1))
            .is_ok());
        assert_eq!(
            issuer.validate_at(&issued.token, t0() + ttl),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_tokens_minted_together_differ() {
        let issuer = issuer();
        let a = issuer.issue_access_at(&driver(), t0()).unwrap();
        let b = issuer.issue_access_at(&driver(), t0()).unwrap();
        assert_ne!(a.token, b.token);
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[test]
    fn test_validate_kind_rejects_refresh_as_access() {
        let issuer = issuer();
        let refresh = issuer.issue_refresh_at(&driver(), t0()).unwrap();
        assert!(matches!(
            issuer.validate_kind_at(&refresh.token, TokenKind::Access, t0()),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_garbage_returns_malformed() {
        assert_eq!(issuer().validate_at("garbage", t0()), Err(TokenError::Malformed));
    }

    #[test]
    fn test_validate_other_signing_secret_returns_invalid() {
        let other = TokenIssuer::new(
            b"a-completely-different-signing-secret!!",
            KEY,
            TokenConfig::default(),
        )
        .unwrap();
        let issued = other.issue_access_at(&driver(), t0()).unwrap();
        assert!(matches!(
            issuer().validate_at(&issued.token, t0()),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_hs256_header() {
        let issuer = issuer();
        let issued = issuer.issue_access_at(&driver(), t0()).unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = encode_segment(&issued.claims).unwrap();
        let forged = issuer
            .cipher
            .encrypt(format!("{header}.{payload}.").as_bytes())
            .unwrap();

        assert!(matches!(
            issuer.validate_at(&forged, t0()),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_two_segment_compact() {
        let issuer = issuer();
        let forged = issuer.cipher.encrypt(b"abc.def").unwrap();
        assert_eq!(issuer.validate_at(&forged, t0()), Err(TokenError::Malformed));
    }

    #[test]
    fn test_inspect_reads_expired_token() {
        let issuer = issuer();
        let issued = issuer.issue_access_at(&driver(), t0()).unwrap();
        assert_eq!(
            issuer.validate_at(&issued.token, t0() + DAY),
            Err(TokenError::Expired)
        );
        assert_eq!(issuer.inspect(&issued.token).unwrap(), issued.claims);
    }

    #[test]
    fn test_new_rejects_empty_secret() {
        assert_eq!(
            TokenIssuer::new(b"", KEY, TokenConfig::default()).unwrap_err(),
            TokenError::InvalidKey(0)
        );
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    #[test]
    fn test_issue_refresh_sets_ceiling_at_expiry() {
        let refresh = issuer().issue_refresh_at(&driver(), t0()).unwrap();
        assert_eq!(refresh.claims.abs_exp, Some(refresh.claims.exp));
        assert_eq!(refresh.expires_at(), t0() + 15 * DAY);
    }

    #[test]
    fn test_rotate_refresh_grants_rotated_ttl_below_ceiling() {
        let issuer = issuer();
        let refresh = issuer.issue_refresh_at(&driver(), t0()).unwrap();

        let rotated = issuer
            .rotate_refresh_at(&refresh.token, t0() + DAY)
            .unwrap();
        assert_eq!(rotated.expires_at(), t0() + 8 * DAY);
        assert_eq!(rotated.claims.abs_exp, refresh.claims.abs_exp);
        assert_eq!(rotated.claims.identity(), driver());
    }

    #[test]
    fn test_rotate_refresh_never_extends_past_ceiling() {
        let issuer = issuer();
        let mut token = issuer.issue_refresh_at(&driver(), t0()).unwrap();

        for day in [5u32, 10, 14] {
            token = issuer
                .rotate_refresh_at(&token.token, t0() + DAY * day)
                .unwrap();
            assert!(token.expires_at() <= t0() + 15 * DAY);
        }
        assert_eq!(token.expires_at(), t0() + 15 * DAY);
        assert_eq!(
            issuer.rotate_refresh_at(&token.token, t0() + 15 * DAY),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_rotate_refresh_rejects_access_token() {
        let issuer = issuer();
        let access = issuer.issue_access_at(&driver(), t0()).unwrap();
        assert!(matches!(
            issuer.rotate_refresh_at(&access.token, t0()),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer abc"), "abc");
        assert_eq!(strip_bearer("  Bearer abc "), "abc");
        assert_eq!(strip_bearer("abc"), "abc");
    }
}
