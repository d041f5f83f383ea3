//! Identity entities
//!
//! Crypto identities and their stable ids, detail-record state
//! machines, trust origins and levels, devices, contacts, and the
//! owned identity aggregate everything else hangs off.

mod contact;
mod crypto_identity;
mod details;
mod device;
mod owned;
mod trust;

pub use contact::ContactIdentity;
pub use crypto_identity::{CryptoIdentity, IdentityId, OwnedCryptoIdentity};
pub use details::{
    DetailsEdit, DetailsState, IdentityDetails, PhotoServerKeyAndLabel, RemoteDetails,
    VersionedDetails,
};
pub use device::{Capability, DeviceUid};
pub use owned::{OwnedIdentity, PhotoDownloadNeed, ServerUserData};
pub use trust::{TrustLevel, TrustOrigin};
