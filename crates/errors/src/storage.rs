//! Storage and local-file error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageError {
    #[error("path not found: {path}")]
    PathNotFound { path: String },

    #[error("corrupted data: {message}")]
    CorruptedData { message: String },

    #[error("shared file is {actual} bytes, shorter than write offset {offset}")]
    SharedFileTruncated { actual: u64, offset: u64 },

    #[error("I/O error: {message}")]
    IoError { message: String },
}
