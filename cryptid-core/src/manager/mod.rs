//! Engine façade and delegates

mod delegates;
mod identity_manager;

pub use delegates::{
    ChannelNotificationSink, CollectingNotificationSink, DirectoryPhotoStore, EngineDelegates,
    MemoryPhotoStore,
    Notification, NotificationSink, NullNotificationSink, PhotoStore,
};
pub use identity_manager::IdentityManager;
