//! cryptid-core
//!
//! Identity and trust management core for an end-to-end encrypted
//! messaging engine. The crate owns every identity-shaped fact the
//! engine knows: owned identities and their key material, contacts
//! and how trust in them was established, both group generations, the
//! optional keycloak binding, and versioned backups of all of it.
//!
//! The crate is transport-agnostic and storage-agnostic: callers feed
//! it blobs, announcements and revocation lists; it maintains the
//! state machine and tells observers what changed. All mutation goes
//! through [`manager::IdentityManager`] inside a transaction from
//! [`core_store::TransactionProvider`].

pub mod config;
pub mod core_backup;
pub mod core_crypto;
pub mod core_group;
pub mod core_group_v2;
pub mod core_identity;
pub mod core_keycloak;
pub mod core_store;
pub mod errors;
pub mod logging;
pub mod manager;

pub use errors::{EngineResult, IdentityEngineError};
pub use manager::{EngineDelegates, IdentityManager, Notification};
