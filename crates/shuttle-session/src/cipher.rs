//! Authenticated encryption of signed tokens.
//!
//! Output layout, before base64url:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ nonce (12 B) │ AES-GCM ciphertext + tag     │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! Every [`encrypt`](TokenCipher::encrypt) draws a fresh random nonce, so
//! sealing the same signed token twice yields two unrelated strings. A
//! repeated nonce under one AES-GCM key would leak the XOR of the two
//! plaintexts and let an attacker forge tags.
//!
//! [`decrypt`](TokenCipher::decrypt) checks the tag over the whole
//! ciphertext before releasing any plaintext. Any failure is reported
//! as the same [`TokenError::Malformed`]:
//!
//! - bad base64;
//! - input shorter than a nonce plus a tag;
//! - any flipped byte;
//! - the wrong key.
//!
//! The caller learns nothing about which check failed.
//!
//! The key is fixed for the life of the process; there is no in-process
//! key rotation, so changing `ENCRYPTION_KEY` invalidates every
//! outstanding token.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;

use crate::TokenError;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// Encrypts and decrypts token strings. Pure and stateless apart from
/// the key.
pub struct TokenCipher {
    cipher: Cipher,
}

impl TokenCipher {
    /// Builds a cipher from raw key bytes: 16 bytes selects AES-128-GCM,
    /// 32 bytes AES-256-GCM.
    pub fn new(key: &[u8]) -> Result<Self, TokenError> {
        let cipher = match key.len() {
            16 => Cipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key)
                    .map_err(|_| TokenError::InvalidKey(key.len()))?,
            )),
            32 => Cipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key)
                    .map_err(|_| TokenError::InvalidKey(key.len()))?,
            )),
            other => return Err(TokenError::InvalidKey(other)),
        };
        Ok(Self { cipher })
    }

    /// Seals `plaintext` under a fresh random nonce and returns the
    /// base64url (unpadded) encoding of `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, TokenError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let sealed = match &self.cipher {
            Cipher::Aes128(c) => c.encrypt(nonce, plaintext),
            Cipher::Aes256(c) => c.encrypt(nonce, plaintext),
        }
        .map_err(|_| TokenError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Opens a token produced by [`encrypt`](Self::encrypt).
    ///
    /// Any tampering, truncation, or wrong key yields
    /// [`TokenError::Malformed`]; partial plaintext is never returned.
    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| TokenError::Malformed)?;
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(TokenError::Malformed);
        }
        let (nonce_bytes, sealed) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        match &self.cipher {
            Cipher::Aes128(c) => c.decrypt(nonce, sealed),
            Cipher::Aes256(c) => c.decrypt(nonce, sealed),
        }
        .map_err(|_| TokenError::Malformed)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self.cipher {
            Cipher::Aes128(_) => "AES-128-GCM",
            Cipher::Aes256(_) => "AES-256-GCM",
        };
        f.debug_struct("TokenCipher").field("cipher", &variant).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_32: &[u8; 32] = b"0123456789abcdef0123456789abcdef";
    const KEY_16: &[u8; 16] = b"0123456789abcdef";

    fn cipher() -> TokenCipher {
        TokenCipher::new(KEY_32).expect("32-byte key")
    }

    #[test]
    fn test_encrypt_then_decrypt_returns_plaintext() {
        let c = cipher();
        for plaintext in [&b""[..], b"a", b"header.payload.signature"] {
            let token = c.encrypt(plaintext).unwrap();
            assert_eq!(c.decrypt(&token).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_encrypt_uses_fresh_nonce_each_call() {
        let c = cipher();
        let a = c.encrypt(b"same").unwrap();
        let b = c.encrypt(b"same").unwrap();
        assert_ne!(a, b, "ciphertexts must differ with fresh nonces");
    }

    #[test]
    fn test_decrypt_any_flipped_byte_returns_malformed() {
        let c = cipher();
        let token = c.encrypt(b"header.payload.signature").unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&token).unwrap();

        for i in 0..raw.len() {
            let mut tampered = raw.clone();
            tampered[i] ^= 0x01;
            let tampered = URL_SAFE_NO_PAD.encode(tampered);
            assert_eq!(
                c.decrypt(&tampered),
                Err(TokenError::Malformed),
                "flip at byte {i} must be rejected"
            );
        }
    }

    #[test]
    fn test_decrypt_truncated_returns_malformed() {
        let c = cipher();
        let token = c.encrypt(b"payload").unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let short = URL_SAFE_NO_PAD.encode(&raw[..raw.len() - 1]);
        assert_eq!(c.decrypt(&short), Err(TokenError::Malformed));
        assert_eq!(c.decrypt(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_decrypt_with_wrong_key_returns_malformed() {
        let token = cipher().encrypt(b"payload").unwrap();
        let other = TokenCipher::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        assert_eq!(other.decrypt(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn test_decrypt_non_base64_returns_malformed() {
        assert_eq!(cipher().decrypt("not base64!!"), Err(TokenError::Malformed));
    }

    #[test]
    fn test_new_accepts_aes128_key() {
        let c = TokenCipher::new(KEY_16).unwrap();
        let token = c.encrypt(b"short key").unwrap();
        assert_eq!(c.decrypt(&token).unwrap(), b"short key");
    }

    #[test]
    fn test_new_rejects_other_key_lengths() {
        assert_eq!(
            TokenCipher::new(b"too short").unwrap_err(),
            TokenError::InvalidKey(9)
        );
    }
}
