//! Group V2 identifier

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_group::GroupUid;

/// Where the authoritative blob of a Group V2 lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupV2Category {
    /// Regular server-hosted group
    Server,
    /// Group managed by a keycloak server
    Keycloak,
}

/// Structured identifier of a Group V2
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupIdentifier {
    pub uid: GroupUid,
    pub server_url: String,
    pub category: GroupV2Category,
}

impl GroupIdentifier {
    pub fn new(uid: GroupUid, server_url: &str, category: GroupV2Category) -> Self {
        GroupIdentifier {
            uid,
            server_url: server_url.to_string(),
            category,
        }
    }

    /// Canonical byte encoding, used in trust origins and logs
    pub fn raw_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(34 + self.server_url.len());
        raw.extend_from_slice(self.uid.as_bytes());
        raw.push(match self.category {
            GroupV2Category::Server => 0,
            GroupV2Category::Keycloak => 1,
        });
        raw.extend_from_slice(self.server_url.as_bytes());
        raw
    }
}

impl fmt::Display for GroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uid, self.server_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_bytes_distinguish_categories() {
        let uid = GroupUid::from_bytes([5u8; 32]);
        let a = GroupIdentifier::new(uid, "https://s.example.org", GroupV2Category::Server);
        let b = GroupIdentifier::new(uid, "https://s.example.org", GroupV2Category::Keycloak);
        assert_ne!(a.raw_bytes(), b.raw_bytes());
    }
}
