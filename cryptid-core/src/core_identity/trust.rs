//! Trust origins and trust levels
//!
//! Every mechanism that established trust in a contact is recorded as
//! a trust origin. The contact's trust level is derived from the full
//! set of origins and can only grow.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::IdentityId;

/// A recorded event by which trust in a contact was established
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustOrigin {
    /// In-person or equivalent direct verification
    Direct { timestamp: u64 },
    /// Introduced by a mutual contact
    Introduction {
        mediator: IdentityId,
        timestamp: u64,
    },
    /// Co-membership in a Group V1
    Group {
        group_owner: IdentityId,
        timestamp: u64,
    },
    /// Certified by a keycloak server both parties trust
    Keycloak {
        server_url: String,
        timestamp: u64,
    },
    /// Co-membership in a Group V2
    ServerGroupV2 {
        raw_group_identifier: Vec<u8>,
        timestamp: u64,
    },
}

impl TrustOrigin {
    /// When this origin was recorded (unix seconds)
    pub fn timestamp(&self) -> u64 {
        match self {
            TrustOrigin::Direct { timestamp }
            | TrustOrigin::Introduction { timestamp, .. }
            | TrustOrigin::Group { timestamp, .. }
            | TrustOrigin::Keycloak { timestamp, .. }
            | TrustOrigin::ServerGroupV2 { timestamp, .. } => *timestamp,
        }
    }

    /// Strength of trust this origin grants on its own
    pub fn trust_level(&self) -> TrustLevel {
        match self {
            TrustOrigin::Direct { .. } => TrustLevel::DIRECT,
            TrustOrigin::Keycloak { .. } => TrustLevel::CERTIFIED,
            TrustOrigin::Introduction { .. } => TrustLevel::INDIRECT,
            TrustOrigin::Group { .. } => TrustLevel::INDIRECT,
            TrustOrigin::ServerGroupV2 { .. } => TrustLevel::SERVER,
        }
    }
}

/// Derived strength-of-trust value
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct TrustLevel(pub u8);

impl TrustLevel {
    /// No trust established
    pub const ZERO: TrustLevel = TrustLevel(0);
    /// Trust established through a server-mediated group
    pub const SERVER: TrustLevel = TrustLevel(1);
    /// Trust established through a mutual contact or group
    pub const INDIRECT: TrustLevel = TrustLevel(2);
    /// Trust certified by an identity provider
    pub const CERTIFIED: TrustLevel = TrustLevel(3);
    /// Trust established directly
    pub const DIRECT: TrustLevel = TrustLevel(4);

    /// The trust level derived from a set of origins: the maximum of
    /// the per-origin levels, never less than what any single origin
    /// grants.
    pub fn from_origins<'a>(origins: impl IntoIterator<Item = &'a TrustOrigin>) -> TrustLevel {
        origins
            .into_iter()
            .map(|origin| origin.trust_level())
            .max()
            .unwrap_or(TrustLevel::ZERO)
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
