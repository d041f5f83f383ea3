//! Group V2 engine
//!
//! Consolidated, signed-blob groups. The full group state lives in a
//! server-hosted encrypted blob; authority over the group is
//! established by an append-only administrators chain. Local state is
//! replaced wholesale when a consolidated blob arrives.

use serde::{Deserialize, Serialize};

mod blob;
mod chain;
mod group;
mod identifier;

pub use blob::{BlobKeys, GroupMemberEntry, ServerBlob, ServerPhotoInfo, INVITATION_NONCE_LENGTH};
pub use chain::{AdministratorsChain, ChainEntry};
pub use group::GroupV2;
pub use identifier::{GroupIdentifier, GroupV2Category};

/// Per-member permission within a Group V2
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// May administer the group (membership, details, permissions)
    GroupAdmin,
    /// May remote-delete any message
    RemoteDeleteAnything,
    /// May edit or remote-delete own messages
    EditOrRemoteDeleteOwnMessages,
    /// May change shared group settings
    ChangeSettings,
    /// May send messages
    SendMessage,
}
