/*
    errors.rs - Error types for the identity & trust core

    Defines the full error taxonomy of the engine:
    - not-found conditions (always recoverable, callers branch on them)
    - precondition violations (caller asked for something inconsistent)
    - version conflicts (stale detail or watermark versions)
    - crypto failures (seed derivation, signature/MAC verification)
    - consistency faults (broken internal invariants, never expected)

    Any error surfaced out of a transaction corresponds to a discarded
    (rolled-back) working copy.
*/

use thiserror::Error;

use crate::core_crypto::CryptoError;

/// Errors that can occur in the identity engine
#[derive(Debug, Error)]
pub enum IdentityEngineError {
    /// The referenced owned identity does not exist
    #[error("Owned identity not found")]
    OwnedIdentityNotFound,

    /// The referenced contact does not exist for this owned identity
    #[error("Contact identity not found")]
    ContactIdentityNotFound,

    /// The referenced group (V1) does not exist
    #[error("Group not found")]
    GroupNotFound,

    /// The referenced group (V2) does not exist
    #[error("Group V2 not found")]
    GroupV2NotFound,

    /// A contact with this crypto identity already exists
    #[error("Contact identity already exists")]
    ContactIdentityAlreadyExists,

    /// A group with this identifier already exists
    #[error("Group already exists")]
    GroupAlreadyExists,

    /// An owned group can only be deleted once empty
    #[error("Owned contact group still has members or pending members")]
    OwnedContactGroupStillHasMembersOrPendingMembers,

    /// Contact deletion was requested with strict checking while the
    /// contact still belongs to a common group
    #[error("Contact is still part of a common group")]
    ContactStillMemberOfCommonGroup,

    /// The identity is not a pending member of the group
    #[error("Identity is not a pending member of the group")]
    NotAPendingMember,

    /// The identity is not a member of the group
    #[error("Identity is not a member of the group")]
    NotAGroupMember,

    /// Promoting a pending member requires it to be a known, active contact
    #[error("Pending member is not an active contact")]
    PendingMemberIsNotAnActiveContact,

    /// An identity may never be both a member and a pending member
    #[error("Identity is already a member or pending member of the group")]
    MemberAndPendingMemberOverlap,

    /// Incoming detail version is lower than the stored one and no
    /// downgrade was allowed
    #[error("Version conflict: stored {stored}, incoming {incoming}")]
    VersionConflict { stored: u64, incoming: u64 },

    /// Photo update targeted a version that is not pending download
    #[error("Photo version mismatch: expected {expected}, got {actual}")]
    PhotoVersionMismatch { expected: u32, actual: u32 },

    /// A frozen group V2 rejects local mutation until unfrozen
    #[error("Group is frozen while a server-side update is pending")]
    GroupIsFrozen,

    /// Group V2 invitation nonces must be unique within the group
    #[error("Duplicate invitation nonce within group")]
    DuplicateInvitationNonce,

    /// Seed diversification requires non-empty diversification data
    #[error("Diversification data cannot be empty")]
    DiversificationDataCannotBeEmpty,

    /// The owned identity is not bound to a keycloak server
    #[error("Owned identity is not keycloak managed")]
    OwnedIdentityIsNotKeycloakManaged,

    /// Restore requires the local store to hold zero owned identities
    #[error("Restore requires an empty store")]
    RestoreRequiresEmptyStore,

    /// A backup payload must contain exactly one owned identity
    #[error("Backup payload must contain exactly one owned identity, got {0}")]
    BackupMustContainExactlyOneOwnedIdentity(usize),

    /// Backup payload could not be understood
    #[error("Invalid backup payload: {0}")]
    InvalidBackupPayload(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Photo storage I/O error
    #[error("Photo storage error: {0}")]
    PhotoStorage(String),

    /// Internal invariant broken; the operation was aborted
    #[error("Consistency fault: {0}")]
    ConsistencyFault(String),
}

impl IdentityEngineError {
    /// Whether callers are expected to branch on this error rather
    /// than treat it as fatal to the surrounding flow
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IdentityEngineError::OwnedIdentityNotFound
                | IdentityEngineError::ContactIdentityNotFound
                | IdentityEngineError::GroupNotFound
                | IdentityEngineError::GroupV2NotFound
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, IdentityEngineError>;

impl From<serde_json::Error> for IdentityEngineError {
    fn from(err: serde_json::Error) -> Self {
        IdentityEngineError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for IdentityEngineError {
    fn from(err: bincode::Error) -> Self {
        IdentityEngineError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for IdentityEngineError {
    fn from(err: std::io::Error) -> Self {
        IdentityEngineError::PhotoStorage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_recoverable() {
        assert!(IdentityEngineError::OwnedIdentityNotFound.is_recoverable());
        assert!(IdentityEngineError::ContactIdentityNotFound.is_recoverable());
        assert!(!IdentityEngineError::GroupIsFrozen.is_recoverable());
    }

    #[test]
    fn test_version_conflict_display() {
        let err = IdentityEngineError::VersionConflict {
            stored: 4,
            incoming: 2,
        };
        assert!(err.to_string().contains("stored 4"));
        assert!(err.to_string().contains("incoming 2"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: IdentityEngineError = io.into();
        assert!(matches!(err, IdentityEngineError::PhotoStorage(_)));
    }
}
