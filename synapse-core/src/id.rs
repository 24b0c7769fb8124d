//! Unique identifier types for Synapse entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A unique identifier for nouns and verbs.
///
/// Uses UUIDv4 for globally unique, collision-resistant IDs. The identifier
/// is opaque to callers; only uniqueness within a storage namespace matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynapseId(Uuid);

impl SynapseId {
    /// Create a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from a string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SynapseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SynapseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SynapseId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<SynapseId> for Uuid {
    fn from(id: SynapseId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SynapseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
