//! Identity and group detail records
//!
//! Detail records come in three views: what a party publishes, what
//! the local user has explicitly trusted, and an in-progress local
//! edit ("latest"). Two explicit state machines cover every entity:
//!
//! - [`DetailsState`]: published/latest two-phase editing, used by
//!   owned identities and owned groups (no remote trust step).
//! - [`RemoteDetails`]: trusted/published pair with a version
//!   downgrade guard, used by contacts and joined groups.

use serde::{Deserialize, Serialize};

use crate::errors::{EngineResult, IdentityEngineError};

/// Profile data carried by an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDetails {
    pub name: String,
    pub position: Option<String>,
    pub company: Option<String>,
}

impl IdentityDetails {
    pub fn new(name: &str) -> Self {
        IdentityDetails {
            name: name.to_string(),
            position: None,
            company: None,
        }
    }
}

/// Key and label of a photo uploaded to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoServerKeyAndLabel {
    /// Encryption key the photo was uploaded under
    pub key: Vec<u8>,
    /// Server-side label identifying the upload
    pub label: Vec<u8>,
}

/// A versioned detail record, optionally referencing a photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedDetails<D> {
    /// Monotonically increasing version number
    pub version: u32,
    /// The detail content itself
    pub details: D,
    /// Photo key/label on the server, when a photo is published
    pub photo_server_key_and_label: Option<PhotoServerKeyAndLabel>,
    /// Local photo filename, once the photo bytes are on disk
    pub photo_filename: Option<String>,
}

impl<D> VersionedDetails<D> {
    pub fn initial(details: D) -> Self {
        VersionedDetails {
            version: 0,
            details,
            photo_server_key_and_label: None,
            photo_filename: None,
        }
    }

    /// Whether the photo still has to be fetched from the server
    pub fn photo_needs_download(&self) -> bool {
        self.photo_server_key_and_label.is_some() && self.photo_filename.is_none()
    }
}

/// An in-progress local edit of detail content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsEdit<D> {
    pub details: D,
    pub photo_filename: Option<String>,
    pub photo_server_key_and_label: Option<PhotoServerKeyAndLabel>,
}

/// Two-phase published/latest detail editing
///
/// Edits land in `latest`; they become visible to others only through
/// an explicit `publish`, or disappear through an explicit `discard`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailsState<D> {
    /// No edit in progress
    Published { current: VersionedDetails<D> },
    /// A local edit exists on top of the published record
    PendingEdit {
        current: VersionedDetails<D>,
        based_on_version: u32,
        latest: DetailsEdit<D>,
    },
}

impl<D: Clone + PartialEq> DetailsState<D> {
    pub fn new(details: D) -> Self {
        DetailsState::Published {
            current: VersionedDetails::initial(details),
        }
    }

    /// The currently published record
    pub fn published(&self) -> &VersionedDetails<D> {
        match self {
            DetailsState::Published { current } => current,
            DetailsState::PendingEdit { current, .. } => current,
        }
    }

    fn published_mut(&mut self) -> &mut VersionedDetails<D> {
        match self {
            DetailsState::Published { current } => current,
            DetailsState::PendingEdit { current, .. } => current,
        }
    }

    /// The pending edit, if any
    pub fn latest(&self) -> Option<&DetailsEdit<D>> {
        match self {
            DetailsState::Published { .. } => None,
            DetailsState::PendingEdit { latest, .. } => Some(latest),
        }
    }

    /// Record a local edit (starts one if none is in progress)
    pub fn set_latest(&mut self, edit: DetailsEdit<D>) {
        let current = self.published().clone();
        let based_on_version = current.version;
        *self = DetailsState::PendingEdit {
            current,
            based_on_version,
            latest: edit,
        };
    }

    /// Publish the pending edit. The version is bumped only when the
    /// edit actually changes something. Returns true when a new
    /// version was published.
    pub fn publish(&mut self) -> bool {
        let (current, latest) = match self {
            DetailsState::Published { .. } => return false,
            DetailsState::PendingEdit { current, latest, .. } => (current.clone(), latest.clone()),
        };

        let unchanged = latest.details == current.details
            && latest.photo_filename == current.photo_filename;
        if unchanged {
            *self = DetailsState::Published { current };
            return false;
        }

        *self = DetailsState::Published {
            current: VersionedDetails {
                version: current.version + 1,
                details: latest.details,
                photo_server_key_and_label: latest.photo_server_key_and_label,
                photo_filename: latest.photo_filename,
            },
        };
        true
    }

    /// Discard the pending edit, if any
    pub fn discard(&mut self) {
        if let DetailsState::PendingEdit { current, .. } = self {
            *self = DetailsState::Published {
                current: current.clone(),
            };
        }
    }

    /// Install the photo server key/label on the published record,
    /// propagating to the pending edit only when its photo is the
    /// same file as the published one.
    pub fn set_photo_server_key_and_label(&mut self, key_and_label: PhotoServerKeyAndLabel) {
        match self {
            DetailsState::Published { current } => {
                current.photo_server_key_and_label = Some(key_and_label);
            }
            DetailsState::PendingEdit { current, latest, .. } => {
                if latest.photo_filename == current.photo_filename {
                    latest.photo_server_key_and_label = Some(key_and_label.clone());
                }
                current.photo_server_key_and_label = Some(key_and_label);
            }
        }
    }

    /// Check that the published record at `version` is still waiting
    /// for its photo, without mutating anything
    pub fn check_awaiting_photo(&self, version: u32) -> EngineResult<()> {
        let current = self.published();
        if current.version != version || current.photo_server_key_and_label.is_none() {
            return Err(IdentityEngineError::PhotoVersionMismatch {
                expected: current.version,
                actual: version,
            });
        }
        Ok(())
    }

    /// Attach a downloaded photo to the published record. Rejected
    /// when `version` is not the version whose photo download is
    /// pending.
    pub fn update_downloaded_photo(&mut self, version: u32, filename: String) -> EngineResult<()> {
        self.check_awaiting_photo(version)?;
        self.published_mut().photo_filename = Some(filename);
        Ok(())
    }
}

/// Trusted/published detail pair for remotely-authored records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDetails<D> {
    /// What the local user has explicitly accepted
    pub trusted: VersionedDetails<D>,
    /// The latest record the remote party advertises, when it differs
    pub published: Option<VersionedDetails<D>>,
}

impl<D: Clone + PartialEq> RemoteDetails<D> {
    pub fn new(details: D) -> Self {
        RemoteDetails {
            trusted: VersionedDetails::initial(details),
            published: None,
        }
    }

    /// Record newly advertised details. A version lower than the one
    /// already stored is rejected unless `allow_version_downgrade` is
    /// set (used during authoritative resets). Returns true when the
    /// stored published record changed.
    pub fn update_published(
        &mut self,
        new: VersionedDetails<D>,
        allow_version_downgrade: bool,
    ) -> EngineResult<bool> {
        let stored_version = self
            .published
            .as_ref()
            .map(|p| p.version)
            .unwrap_or(self.trusted.version);
        if !allow_version_downgrade && new.version < stored_version {
            return Err(IdentityEngineError::VersionConflict {
                stored: stored_version.into(),
                incoming: new.version.into(),
            });
        }
        let changed = self.published.as_ref() != Some(&new);
        self.published = Some(new);
        Ok(changed)
    }

    /// Explicit user action: accept the published record as trusted.
    /// Returns true when something was trusted.
    pub fn trust_published(&mut self) -> bool {
        match self.published.take() {
            Some(published) => {
                self.trusted = published;
                true
            }
            None => false,
        }
    }

    /// Check that a record at `version` is still waiting for its
    /// photo, without mutating anything
    pub fn check_awaiting_photo(&self, version: u32) -> EngineResult<()> {
        if let Some(published) = &self.published {
            if published.version == version && published.photo_server_key_and_label.is_some() {
                return Ok(());
            }
        }
        if self.trusted.version == version && self.trusted.photo_server_key_and_label.is_some() {
            return Ok(());
        }
        Err(IdentityEngineError::PhotoVersionMismatch {
            expected: self
                .published
                .as_ref()
                .map(|p| p.version)
                .unwrap_or(self.trusted.version),
            actual: version,
        })
    }

    /// Attach a downloaded photo to whichever record is waiting for it
    pub fn update_downloaded_photo(&mut self, version: u32, filename: String) -> EngineResult<()> {
        self.check_awaiting_photo(version)?;
        if let Some(published) = self.published.as_mut() {
            if published.version == version && published.photo_server_key_and_label.is_some() {
                published.photo_filename = Some(filename);
                return Ok(());
            }
        }
        self.trusted.photo_filename = Some(filename);
        Ok(())
    }
}
