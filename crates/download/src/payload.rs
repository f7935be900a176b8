//! Contracts toward the payload applier and the update-attempt state

use otad_errors::{ErrorCode, Result};
use otad_hash::Hash;

/// Byte sink for the streamed payload: the delta applier behind a narrow
/// seam, so tests can substitute a recorder.
///
/// Bytes arrive in offset order, each byte exactly once. `close` is called
/// once when streaming ends (successfully or not); `verify_payload` may be
/// called after `close` and authenticates what was streamed.
pub trait PayloadWriter: Send {
    /// Consume the next chunk of payload bytes.
    ///
    /// # Errors
    ///
    /// On failure returns the completion code the download stage must
    /// eventually report.
    fn write(&mut self, data: &[u8]) -> std::result::Result<(), ErrorCode>;

    /// Flush state and release resources held for streaming.
    ///
    /// # Errors
    ///
    /// Returns an error when flushing fails; the download stage treats this
    /// as a warning, the payload verification still decides the outcome.
    fn close(&mut self) -> Result<()>;

    /// Authenticate the streamed payload against the manifest's hash and
    /// size.
    fn verify_payload(&mut self, expected_hash: &Hash, expected_size: u64) -> ErrorCode;

    /// Whether the payload's manifest head has been parsed and its
    /// signature checked. Gates peer visibility of the shared payload.
    fn is_manifest_valid(&self) -> bool;
}

/// Per-attempt policy state consulted when the download starts.
pub trait PayloadState: Send + Sync {
    /// Whether this device should serve the payload to local peers.
    fn using_p2p_for_sharing(&self) -> bool;

    /// Whether this attempt was pointed at a local peer.
    fn using_p2p_for_downloading(&self) -> bool;

    /// The peer URL chosen for this attempt, if any.
    fn p2p_url(&self) -> Option<String>;
}
