//! Server configuration.
//!
//! Every knob has a default except the two secrets. [`ServerConfig::from_env`]
//! reads overrides from the environment:
//!
//! | variable | default |
//! |---|---|
//! | `SHUTTLE_BIND_ADDR` | `127.0.0.1:8080` |
//! | `JWT_SECRET` | required, at least 32 bytes |
//! | `ENCRYPTION_KEY` | required, 16 or 32 bytes |
//! | `SHUTTLE_ACCESS_TTL_SECS` | `7200` |
//! | `SHUTTLE_REFRESH_TTL_SECS` | `1296000` |
//! | `SHUTTLE_ROTATED_REFRESH_TTL_SECS` | `604800` |
//! | `SHUTTLE_MIN_ROTATION_INTERVAL_MS` | `1000` |
//! | `SHUTTLE_REVOCATION_SWEEP_SECS` | `300` |
//! | `SHUTTLE_HANDSHAKE_TIMEOUT_SECS` | `10` |
//! | `SHUTTLE_IDLE_TIMEOUT_SECS` | `0` (off) |

use std::str::FromStr;
use std::time::Duration;

use shuttle_session::SessionConfig;

/// Minimum length of the token signing secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} is not set")]
    Missing(&'static str),

    /// A variable is set but unusable.
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Everything needed to build a [`ShuttleServer`](crate::ShuttleServer).
#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// HS256 signing secret.
    pub jwt_secret: Vec<u8>,
    /// AES-GCM key for sealing tokens.
    pub encryption_key: Vec<u8>,
    pub session: SessionConfig,
    /// How often expired entries are swept from the revocation list.
    pub revocation_sweep: Duration,
    /// Drop peers that have not finished the WebSocket upgrade after
    /// this long.
    pub handshake_timeout: Duration,
    /// Close connections that send nothing for this long. `None` keeps
    /// idle connections open indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            jwt_secret: Vec::new(),
            encryption_key: Vec::new(),
            session: SessionConfig::default(),
            revocation_sweep: Duration::from_secs(300),
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("SHUTTLE_BIND_ADDR") {
            config.bind_addr = addr;
        }
        config.jwt_secret = lookup("JWT_SECRET")
            .ok_or(ConfigError::Missing("JWT_SECRET"))?
            .into_bytes();
        config.encryption_key = lookup("ENCRYPTION_KEY")
            .ok_or(ConfigError::Missing("ENCRYPTION_KEY"))?
            .into_bytes();

        let tokens = &mut config.session.tokens;
        if let Some(secs) = parse(&lookup, "SHUTTLE_ACCESS_TTL_SECS")? {
            tokens.access_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "SHUTTLE_REFRESH_TTL_SECS")? {
            tokens.refresh_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "SHUTTLE_ROTATED_REFRESH_TTL_SECS")? {
            tokens.rotated_refresh_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse(&lookup, "SHUTTLE_MIN_ROTATION_INTERVAL_MS")? {
            config.session.min_rotation_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(&lookup, "SHUTTLE_REVOCATION_SWEEP_SECS")? {
            config.revocation_sweep = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "SHUTTLE_HANDSHAKE_TIMEOUT_SECS")? {
            config.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "SHUTTLE_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks secrets and durations are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                reason: format!(
                    "must be at least {MIN_SECRET_LEN} bytes, got {}",
                    self.jwt_secret.len()
                ),
            });
        }
        if !matches!(self.encryption_key.len(), 16 | 32) {
            return Err(ConfigError::Invalid {
                key: "ENCRYPTION_KEY",
                reason: format!("must be 16 or 32 bytes, got {}", self.encryption_key.len()),
            });
        }
        let tokens = &self.session.tokens;
        if tokens.access_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SHUTTLE_ACCESS_TTL_SECS",
                reason: "must be positive".into(),
            });
        }
        if tokens.refresh_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SHUTTLE_REFRESH_TTL_SECS",
                reason: "must be positive".into(),
            });
        }
        if tokens.rotated_refresh_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SHUTTLE_ROTATED_REFRESH_TTL_SECS",
                reason: "must be positive".into(),
            });
        }
        if self.revocation_sweep.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SHUTTLE_REVOCATION_SWEEP_SECS",
                reason: "must be positive".into(),
            });
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SHUTTLE_HANDSHAKE_TIMEOUT_SECS",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"<redacted>")
            .field("encryption_key", &"<redacted>")
            .field("session", &self.session)
            .field("revocation_sweep", &self.revocation_sweep)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const KEY: &str = "fedcba9876543210";

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_applies_defaults() {
        let config =
            ServerConfig::from_lookup(env(&[("JWT_SECRET", SECRET), ("ENCRYPTION_KEY", KEY)]))
                .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.session.tokens.access_ttl, Duration::from_secs(7200));
        assert_eq!(config.session.min_rotation_interval, Duration::from_secs(1));
        assert_eq!(config.revocation_sweep, Duration::from_secs(300));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = ServerConfig::from_lookup(env(&[
            ("JWT_SECRET", SECRET),
            ("ENCRYPTION_KEY", KEY),
            ("SHUTTLE_BIND_ADDR", "0.0.0.0:9000"),
            ("SHUTTLE_ACCESS_TTL_SECS", "60"),
            ("SHUTTLE_MIN_ROTATION_INTERVAL_MS", "250"),
            ("SHUTTLE_HANDSHAKE_TIMEOUT_SECS", "3"),
            ("SHUTTLE_IDLE_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.session.tokens.access_ttl, Duration::from_secs(60));
        assert_eq!(config.session.min_rotation_interval, Duration::from_millis(250));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_lookup_missing_secret_fails() {
        let result = ServerConfig::from_lookup(env(&[("ENCRYPTION_KEY", KEY)]));
        assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn test_from_lookup_short_secret_fails() {
        let result =
            ServerConfig::from_lookup(env(&[("JWT_SECRET", "short"), ("ENCRYPTION_KEY", KEY)]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "JWT_SECRET", .. })
        ));
    }

    #[test]
    fn test_from_lookup_bad_key_length_fails() {
        let result = ServerConfig::from_lookup(env(&[
            ("JWT_SECRET", SECRET),
            ("ENCRYPTION_KEY", "twenty-byte-key-xxxx"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "ENCRYPTION_KEY", .. })
        ));
    }

    #[test]
    fn test_from_lookup_unparseable_number_fails() {
        let result = ServerConfig::from_lookup(env(&[
            ("JWT_SECRET", SECRET),
            ("ENCRYPTION_KEY", KEY),
            ("SHUTTLE_ACCESS_TTL_SECS", "two hours"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "SHUTTLE_ACCESS_TTL_SECS", .. })
        ));
    }

    #[test]
    fn test_from_lookup_zero_handshake_timeout_fails() {
        let result = ServerConfig::from_lookup(env(&[
            ("JWT_SECRET", SECRET),
            ("ENCRYPTION_KEY", KEY),
            ("SHUTTLE_HANDSHAKE_TIMEOUT_SECS", "0"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "SHUTTLE_HANDSHAKE_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config =
            ServerConfig::from_lookup(env(&[("JWT_SECRET", SECRET), ("ENCRYPTION_KEY", KEY)]))
                .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("<redacted>"));
    }
}
