//! Group V1 engine
//!
//! Legacy per-member groups. An owned group is authored locally and
//! partitions identities into members and pending members; a joined
//! group mirrors owner-authored information with a local watermark.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_crypto::Prng;

mod joined_group;
mod owned_group;

pub use joined_group::JoinedGroup;
pub use owned_group::{OwnedGroup, PendingMember};

/// Unique identifier of a Group V1
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupUid([u8; 32]);

// Hex string in human-readable formats so the uid works as a JSON map
// key (e.g. `OwnedIdentity::groups_owned` in backup snapshots); raw
// bytes in binary formats to keep the bincode wire encoding unchanged.
impl Serialize for GroupUid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for GroupUid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| serde::de::Error::custom("GroupUid must be 32 bytes"))?;
            Ok(GroupUid(arr))
        } else {
            Ok(GroupUid(<[u8; 32]>::deserialize(deserializer)?))
        }
    }
}

impl GroupUid {
    /// Generate a fresh random group UID
    pub fn generate(prng: &mut dyn Prng) -> Self {
        let mut bytes = [0u8; 32];
        prng.fill_bytes(&mut bytes);
        GroupUid(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        GroupUid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for GroupUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for GroupUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupUid({})", self)
    }
}

/// Core profile data of a Group V1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDetails {
    pub name: String,
    pub description: Option<String>,
}

impl GroupDetails {
    pub fn new(name: &str) -> Self {
        GroupDetails {
            name: name.to_string(),
            description: None,
        }
    }
}
