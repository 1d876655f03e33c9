//! Identity and routing types shared by every layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Numeric user id as stored by the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role a user holds in the shuttle system.
///
/// Serialized as the short code the rest of the platform uses
/// (`"SA"`, `"AS"`, `"D"`, `"P"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleCode {
    /// Platform-wide administrator.
    #[serde(rename = "SA")]
    SuperAdmin,
    /// Administrator of a single school.
    #[serde(rename = "AS")]
    SchoolAdmin,
    /// Shuttle driver.
    #[serde(rename = "D")]
    Driver,
    /// Parent of one or more students.
    #[serde(rename = "P")]
    Parent,
}

impl RoleCode {
    /// The wire code for this role.
    pub fn code(self) -> &'static str {
        match self {
            Self::SuperAdmin => "SA",
            Self::SchoolAdmin => "AS",
            Self::Driver => "D",
            Self::Parent => "P",
        }
    }
}

impl fmt::Display for RoleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for RoleCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SA" => Ok(Self::SuperAdmin),
            "AS" => Ok(Self::SchoolAdmin),
            "D" => Ok(Self::Driver),
            "P" => Ok(Self::Parent),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown role code {other:?}"
            ))),
        }
    }
}

/// An authenticated user, as resolved by the user directory.
///
/// Owned externally and immutable for the life of a session. Tokens
/// carry a copy of it by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub user_uuid: Uuid,
    pub display_name: String,
    pub role: RoleCode,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.user_uuid, self.role)
    }
}

// ---------------------------------------------------------------------------
// Groups and routes
// ---------------------------------------------------------------------------

/// Identifies one shuttle's broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupKey(String);

impl GroupKey {
    /// Creates a key. Empty keys and keys containing `/` are rejected.
    pub fn new(key: impl Into<String>) -> Result<Self, ProtocolError> {
        let key = key.into();
        if key.is_empty() || key.contains('/') {
            return Err(ProtocolError::InvalidMessage(format!(
                "invalid group key {key:?}"
            )));
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which realtime mode a client asked for.
///
/// ```text
/// /ws            → Solo
/// /ws/           → Solo
/// /ws/{shuttle}  → Group(shuttle)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Personal channel: the connection is registered by identity only.
    Solo,
    /// Shuttle channel: the connection joins the shuttle's group.
    Group(GroupKey),
}

impl Route {
    /// The path prefix of the realtime endpoint.
    pub const PREFIX: &'static str = "/ws";

    /// Parses an upgrade request path.
    pub fn parse(path: &str) -> Result<Self, ProtocolError> {
        let rest = path
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| ProtocolError::UnknownRoute(path.to_string()))?;
        match rest {
            "" | "/" => Ok(Self::Solo),
            _ => {
                let key = rest
                    .strip_prefix('/')
                    .ok_or_else(|| ProtocolError::UnknownRoute(path.to_string()))?;
                let key = key.strip_suffix('/').unwrap_or(key);
                GroupKey::new(key)
                    .map(Self::Group)
                    .map_err(|_| ProtocolError::UnknownRoute(path.to_string()))
            }
        }
    }

    /// The group this route targets, if any.
    pub fn group(&self) -> Option<&GroupKey> {
        match self {
            Self::Solo => None,
            Self::Group(key) => Some(key),
        }
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Coarse online/offline status reported to the user directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::Offline => f.write_str("offline"),
        }
    }
}
