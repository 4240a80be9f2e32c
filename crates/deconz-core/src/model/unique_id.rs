// ── Identity types ──
//
// `UniqueId` names a device in the catalogue; `SubscriberId` names a party
// registered for its updates.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── UniqueId ────────────────────────────────────────────────────────

/// Gateway-assigned, stable device identifier.
///
/// Lights and sensors use the gateway's `uniqueid` (a Zigbee MAC plus
/// endpoint suffix). Groups have none, so they get a synthetic
/// `group_<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(String);

impl UniqueId {
    pub const GROUP_PREFIX: &'static str = "group_";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Synthetic id for the group at `index`.
    pub fn group(index: impl fmt::Display) -> Self {
        Self(format!("{}{index}", Self::GROUP_PREFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.starts_with(Self::GROUP_PREFIX)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UniqueId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for UniqueId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for UniqueId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── SubscriberId ────────────────────────────────────────────────────

/// Identity of a subscription owner (an automation node, a CLI watcher).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id for anonymous listeners.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
