//! Boot-control and block-device error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PlatformError {
    #[error("no device for partition {name} in slot {slot}")]
    PartitionDeviceNotFound { name: String, slot: String },

    #[error("unable to mark slot {slot} unbootable: {message}")]
    MarkSlotUnbootableFailed { slot: String, message: String },

    #[error("cannot size device {path}: {message}")]
    DeviceSizeFailed { path: String, message: String },

    #[error("no recognizable filesystem superblock on {path}")]
    SuperblockNotFound { path: String },
}
