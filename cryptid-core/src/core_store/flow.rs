//! Flow identifiers
//!
//! A flow id ties together the engine-side work triggered by one
//! higher-level operation (a backup, a protocol step). It carries no
//! semantics inside the engine; it exists so log lines and
//! notifications from one flow can be correlated.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation id for one higher-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowId(Uuid);

impl FlowId {
    /// Mint a fresh flow id
    pub fn new() -> Self {
        FlowId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        FlowId::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for FlowId {
    fn from(uuid: Uuid) -> Self {
        FlowId(uuid)
    }
}
