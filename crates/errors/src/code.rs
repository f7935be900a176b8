//! Flat completion-code taxonomy for the update pipeline
//!
//! Every pipeline stage finishes with exactly one `ErrorCode`. Rich error
//! context travels as [`crate::Error`] inside a stage; the code is what
//! crosses the stage boundary and what the pipeline owner ultimately sees.

use std::fmt;

/// Completion code reported by a pipeline action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorCode {
    /// The stage finished its work and the pipeline may advance.
    Success,
    /// Generic internal failure (I/O, hashing, cancellation).
    Error,
    /// The HTTP transfer reported unsuccessful completion.
    DownloadTransferError,
    /// The streamed payload does not hash to the manifest's value.
    PayloadHashMismatchError,
    /// The streamed payload's byte count differs from the manifest's value.
    PayloadSizeMismatchError,
    /// The payload carried no signature although one was required.
    SignedDeltaPayloadExpectedError,
    /// The early-manifest signature did not verify.
    DownloadInvalidMetadataSignature,
    /// A partition device could not be opened, read, or was shorter than
    /// the manifest claimed.
    FilesystemVerifierError,
    /// A freshly written target partition does not hash to the value the
    /// install plan promised.
    NewRootfsVerificationError,
}

impl ErrorCode {
    /// Whether this code lets the pipeline advance to the next stage.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::DownloadTransferError => "download_transfer_error",
            Self::PayloadHashMismatchError => "payload_hash_mismatch_error",
            Self::PayloadSizeMismatchError => "payload_size_mismatch_error",
            Self::SignedDeltaPayloadExpectedError => "signed_delta_payload_expected_error",
            Self::DownloadInvalidMetadataSignature => "download_invalid_metadata_signature",
            Self::FilesystemVerifierError => "filesystem_verifier_error",
            Self::NewRootfsVerificationError => "new_rootfs_verification_error",
        };
        f.write_str(name)
    }
}
