//! Engine delegates
//!
//! The engine does not talk to the UI or the filesystem on its own.
//! Observers receive typed notifications through a [`NotificationSink`]
//! and photo bytes go through a [`PhotoStore`]. Both are injected once
//! at construction via [`EngineDelegates`].

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::core_group::GroupUid;
use crate::core_group_v2::GroupIdentifier;
use crate::core_identity::{IdentityId, TrustLevel};
use crate::core_store::FlowId;
use crate::errors::{EngineResult, IdentityEngineError};

/// Events the engine emits. Delivery happens only after the
/// transaction that produced them commits; rolled-back work stays
/// invisible to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OwnedIdentityGenerated {
        owned: IdentityId,
    },
    OwnedIdentityDeleted {
        owned: IdentityId,
    },
    ContactAdded {
        owned: IdentityId,
        contact: IdentityId,
    },
    ContactDeleted {
        owned: IdentityId,
        contact: IdentityId,
    },
    ContactTrustLevelIncreased {
        owned: IdentityId,
        contact: IdentityId,
        trust_level: TrustLevel,
    },
    ContactRevokedAsCompromised {
        owned: IdentityId,
        contact: IdentityId,
    },
    GroupCreated {
        owned: IdentityId,
        group: GroupUid,
    },
    GroupDeleted {
        owned: IdentityId,
        group: GroupUid,
    },
    GroupMembersChanged {
        owned: IdentityId,
        group: GroupUid,
    },
    GroupV2Created {
        owned: IdentityId,
        group: GroupIdentifier,
    },
    GroupV2Updated {
        owned: IdentityId,
        group: GroupIdentifier,
        touched_members: usize,
    },
    GroupV2Deleted {
        owned: IdentityId,
        group: GroupIdentifier,
    },
    BackupRestored {
        flow: FlowId,
        owned: IdentityId,
    },
}

/// Receives engine notifications. Implementations must be cheap and
/// non-blocking; the engine calls them while holding no locks but
/// within the caller's task.
pub trait NotificationSink: Send + Sync {
    fn post(&self, notification: Notification);
}

/// Sink that drops everything, for embeddings without observers
#[derive(Debug, Default)]
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn post(&self, _notification: Notification) {}
}

/// Sink forwarding notifications into an mpsc channel, for embeddings
/// that consume them on their own thread. A disconnected receiver
/// silently drops further notifications.
pub struct ChannelNotificationSink {
    sender: Mutex<std::sync::mpsc::Sender<Notification>>,
}

impl ChannelNotificationSink {
    pub fn new(sender: std::sync::mpsc::Sender<Notification>) -> Self {
        ChannelNotificationSink {
            sender: Mutex::new(sender),
        }
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn post(&self, notification: Notification) {
        if let Ok(sender) = self.sender.lock() {
            let _ = sender.send(notification);
        }
    }
}

/// Sink that records notifications in order, for tests
#[derive(Debug, Default)]
pub struct CollectingNotificationSink {
    collected: Mutex<Vec<Notification>>,
}

impl CollectingNotificationSink {
    pub fn new() -> Self {
        CollectingNotificationSink::default()
    }

    pub fn drain(&self) -> Vec<Notification> {
        match self.collected.lock() {
            Ok(mut collected) => std::mem::take(&mut *collected),
            Err(_) => Vec::new(),
        }
    }
}

impl NotificationSink for CollectingNotificationSink {
    fn post(&self, notification: Notification) {
        if let Ok(mut collected) = self.collected.lock() {
            collected.push(notification);
        }
    }
}

/// Stores and serves photo bytes by content-addressed filename
pub trait PhotoStore: Send + Sync {
    /// Store photo bytes for an identity-scoped label and return the
    /// filename. The filename is derived from identity and label, so
    /// storing the same photo slot twice overwrites in place.
    fn store(&self, owner: &IdentityId, label: &[u8], bytes: &[u8]) -> EngineResult<String>;

    fn load(&self, filename: &str) -> EngineResult<Vec<u8>>;

    fn delete(&self, filename: &str) -> EngineResult<()>;
}

/// Content-addressed filename shared by every photo store
fn photo_filename(owner: &IdentityId, label: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(owner.as_bytes());
    hasher.update(&[0x00]);
    hasher.update(label);
    hex::encode(hasher.finalize().as_bytes())
}

/// Photo store writing files into one flat directory
#[derive(Debug, Clone)]
pub struct DirectoryPhotoStore {
    dir: PathBuf,
}

impl DirectoryPhotoStore {
    pub fn new(dir: PathBuf) -> EngineResult<Self> {
        fs::create_dir_all(&dir)
            .map_err(|e| IdentityEngineError::PhotoStorage(e.to_string()))?;
        Ok(DirectoryPhotoStore { dir })
    }
}

impl PhotoStore for DirectoryPhotoStore {
    fn store(&self, owner: &IdentityId, label: &[u8], bytes: &[u8]) -> EngineResult<String> {
        let filename = photo_filename(owner, label);
        fs::write(self.dir.join(&filename), bytes)
            .map_err(|e| IdentityEngineError::PhotoStorage(e.to_string()))?;
        Ok(filename)
    }

    fn load(&self, filename: &str) -> EngineResult<Vec<u8>> {
        fs::read(self.dir.join(filename))
            .map_err(|e| IdentityEngineError::PhotoStorage(e.to_string()))
    }

    fn delete(&self, filename: &str) -> EngineResult<()> {
        match fs::remove_file(self.dir.join(filename)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IdentityEngineError::PhotoStorage(e.to_string())),
        }
    }
}

/// In-memory photo store, for tests and ephemeral embeddings
#[derive(Debug, Default)]
pub struct MemoryPhotoStore {
    photos: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        MemoryPhotoStore::default()
    }
}

impl PhotoStore for MemoryPhotoStore {
    fn store(&self, owner: &IdentityId, label: &[u8], bytes: &[u8]) -> EngineResult<String> {
        let filename = photo_filename(owner, label);
        let mut photos = self
            .photos
            .lock()
            .map_err(|_| IdentityEngineError::PhotoStorage("photo map lock poisoned".to_string()))?;
        photos.insert(filename.clone(), bytes.to_vec());
        Ok(filename)
    }

    fn load(&self, filename: &str) -> EngineResult<Vec<u8>> {
        let photos = self
            .photos
            .lock()
            .map_err(|_| IdentityEngineError::PhotoStorage("photo map lock poisoned".to_string()))?;
        photos
            .get(filename)
            .cloned()
            .ok_or_else(|| IdentityEngineError::PhotoStorage(format!("no photo {}", filename)))
    }

    fn delete(&self, filename: &str) -> EngineResult<()> {
        let mut photos = self
            .photos
            .lock()
            .map_err(|_| IdentityEngineError::PhotoStorage("photo map lock poisoned".to_string()))?;
        photos.remove(filename);
        Ok(())
    }
}

/// Everything the engine needs from its embedding
#[derive(Clone)]
pub struct EngineDelegates {
    pub notifications: Arc<dyn NotificationSink>,
    pub photos: Arc<dyn PhotoStore>,
}

impl EngineDelegates {
    pub fn new(notifications: Arc<dyn NotificationSink>, photos: Arc<dyn PhotoStore>) -> Self {
        EngineDelegates {
            notifications,
            photos,
        }
    }
}
