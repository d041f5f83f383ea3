//! Device identifiers and capabilities

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_crypto::Prng;

/// Unique identifier of a device (current or remote)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceUid([u8; 32]);

impl DeviceUid {
    /// Generate a fresh random device UID
    pub fn generate(prng: &mut dyn Prng) -> Self {
        let mut bytes = [0u8; 32];
        prng.fill_bytes(&mut bytes);
        DeviceUid(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        DeviceUid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceUid({})", self)
    }
}

/// Feature an identity or a device is known to support
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Supports continuous ICE for WebRTC calls
    ContinuousIce,
    /// Understands the one-to-one contact status
    OneToOneContacts,
    /// Understands Group V2
    GroupsV2,
}
