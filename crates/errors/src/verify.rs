//! Partition-verification error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VerifyError {
    #[error("unable to open {path} for reading: {message}")]
    DeviceOpenFailed { path: String, message: String },

    #[error("partition {name} ended {remaining} bytes before its declared size")]
    PartitionTooShort { name: String, remaining: u64 },

    #[error("partition {name} failed target hash verification")]
    TargetHashMismatch { name: String },
}
