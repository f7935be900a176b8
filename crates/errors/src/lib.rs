#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the otad update agent
//!
//! This crate provides fine-grained error types organized by domain, plus the
//! flat [`ErrorCode`] taxonomy that pipeline stages complete with. All error
//! types implement Clone where possible for easier handling.

use thiserror::Error;

pub mod code;
pub mod network;
pub mod platform;
pub mod storage;
pub mod verify;

// Re-export all error types at the root
pub use code::ErrorCode;
pub use network::NetworkError;
pub use platform::PlatformError;
pub use storage::StorageError;
pub use verify::VerifyError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        #[cfg_attr(feature = "serde", serde(with = "io_kind_as_str"))]
        kind: std::io::ErrorKind,
        message: String,
        #[cfg_attr(feature = "serde", serde(with = "opt_path_buf"))]
        path: Option<std::path::PathBuf>,
    },
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Collapse this error into the completion code a pipeline stage would
    /// report for it.
    ///
    /// Stages that know a more specific code for a given failure site use it
    /// directly; this mapping is the default for errors that bubble up
    /// through `?`.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Network(_) => ErrorCode::DownloadTransferError,
            Error::Verify(VerifyError::TargetHashMismatch { .. }) => {
                ErrorCode::NewRootfsVerificationError
            }
            Error::Verify(_) => ErrorCode::FilesystemVerifierError,
            Error::Platform(_)
            | Error::Storage(_)
            | Error::Internal(_)
            | Error::Cancelled
            | Error::Io { .. } => ErrorCode::Error,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

/// Result type alias for otad operations
pub type Result<T> = std::result::Result<T, Error>;

// Serde helper modules for optional path and io::ErrorKind as string
#[cfg(feature = "serde")]
mod io_kind_as_str {
    use serde::{Deserialize, Deserializer, Serializer};
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S>(kind: &std::io::ErrorKind, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("{kind:?}"))
    }
    pub fn deserialize<'de, D>(deserializer: D) -> Result<std::io::ErrorKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        // Best effort mapping; default to Other
        Ok(match s.as_str() {
            "NotFound" => std::io::ErrorKind::NotFound,
            "PermissionDenied" => std::io::ErrorKind::PermissionDenied,
            "ConnectionRefused" => std::io::ErrorKind::ConnectionRefused,
            "ConnectionReset" => std::io::ErrorKind::ConnectionReset,
            "BrokenPipe" => std::io::ErrorKind::BrokenPipe,
            "AlreadyExists" => std::io::ErrorKind::AlreadyExists,
            "InvalidInput" => std::io::ErrorKind::InvalidInput,
            "InvalidData" => std::io::ErrorKind::InvalidData,
            "TimedOut" => std::io::ErrorKind::TimedOut,
            "WriteZero" => std::io::ErrorKind::WriteZero,
            "Interrupted" => std::io::ErrorKind::Interrupted,
            "Unsupported" => std::io::ErrorKind::Unsupported,
            "UnexpectedEof" => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::Other,
        })
    }
}

#[cfg(feature = "serde")]
mod opt_path_buf {
    use serde::{Deserialize, Deserializer, Serializer};
    #[allow(clippy::ref_option)]
    pub fn serialize<S>(path: &Option<std::path::PathBuf>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match path {
            Some(pb) => s.serialize_some(&pb.display().to_string()),
            None => s.serialize_none(),
        }
    }
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<std::path::PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(deserializer)?;
        Ok(opt.map(std::path::PathBuf::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_mapping_prefers_specific_verify_codes() {
        let mismatch: Error = VerifyError::TargetHashMismatch {
            name: "root".to_string(),
        }
        .into();
        assert_eq!(mismatch.code(), ErrorCode::NewRootfsVerificationError);

        let short: Error = VerifyError::PartitionTooShort {
            name: "kernel".to_string(),
            remaining: 512,
        }
        .into();
        assert_eq!(short.code(), ErrorCode::FilesystemVerifierError);
    }

    #[test]
    fn network_errors_map_to_transfer_error() {
        let err: Error = NetworkError::DownloadFailed("reset by peer".to_string()).into();
        assert_eq!(err.code(), ErrorCode::DownloadTransferError);
    }

    #[test]
    fn io_errors_map_to_generic_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.code(), ErrorCode::Error);
        assert!(!err.code().is_success());
    }
}
