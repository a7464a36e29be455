use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a hub connection. Rendered on the wire as `client_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SessionId(pub u64);

/// Identity of a bullet. Rendered on the wire as `b_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BulletId(pub u64);

const SESSION_PREFIX: &str = "client_";
const BULLET_PREFIX: &str = "b_";

/// Error for a wire id that does not carry the expected prefix and number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidId(pub String);

impl fmt::Display for InvalidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid id: {:?}", self.0)
    }
}

impl std::error::Error for InvalidId {}

fn parse_prefixed(s: &str, prefix: &str) -> Result<u64, InvalidId> {
    s.strip_prefix(prefix)
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| InvalidId(s.to_string()))
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SESSION_PREFIX}{}", self.0)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for SessionId {
    type Error = InvalidId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_prefixed(&s, SESSION_PREFIX).map(SessionId)
    }
}

impl fmt::Display for BulletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BULLET_PREFIX}{}", self.0)
    }
}

impl From<BulletId> for String {
    fn from(id: BulletId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for BulletId {
    type Error = InvalidId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_prefixed(&s, BULLET_PREFIX).map(BulletId)
    }
}
