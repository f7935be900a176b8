//! The per-update install plan threaded through the pipeline

use crate::Slot;
use otad_hash::Hash;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Partition name used when a legacy delta manifest carries no explicit
/// partition list and the root filesystem entry must be synthesized.
pub const PARTITION_NAME_ROOT: &str = "root";

/// Partition name for the synthesized kernel entry of a legacy manifest.
pub const PARTITION_NAME_KERNEL: &str = "kernel";

/// The per-update ticket carried from stage to stage.
///
/// Produced by the update-check/preparation layer, mutated by the source
/// hasher (partition list, source sizes and hashes) and treated as read-only
/// by every later stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPlan {
    /// Whether this transfer resumes one interrupted by a reboot.
    pub is_resume: bool,
    /// Full image vs. delta against the currently running slot.
    pub is_full_update: bool,
    /// Payload source; a remote URL or a localhost peer URL.
    pub download_url: String,
    /// Declared payload length in bytes.
    pub payload_size: u64,
    /// Hash the streamed payload must match.
    pub payload_hash: Hash,
    /// Length of the manifest head of the payload.
    pub metadata_size: u64,
    /// Signature over the manifest head.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_signature: Vec<u8>,
    /// Key the payload signature is checked against.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_key_rsa: Vec<u8>,
    /// Slot the delta is computed against.
    pub source_slot: Slot,
    /// Slot the update is written into.
    pub target_slot: Slot,
    /// Whether hash mismatches must abort even for unofficial builds.
    pub hash_checks_mandatory: bool,
    /// Whether finishing this update wipes stateful storage.
    pub powerwash_required: bool,
    /// Partitions touched by this update, in apply order.
    pub partitions: Vec<Partition>,
}

impl InstallPlan {
    /// One-line human summary, suitable for a debug event at stage start.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut s = format!(
            "InstallPlan: {}, payload type: {}, source_slot: {}, target_slot: {}, url: {}, \
             payload size: {}, payload hash: {}, metadata size: {}, \
             hash_checks_mandatory: {}, powerwash_required: {}",
            if self.is_resume { "resume" } else { "new_update" },
            if self.is_full_update { "full" } else { "delta" },
            self.source_slot,
            self.target_slot,
            self.download_url,
            self.payload_size,
            self.payload_hash,
            self.metadata_size,
            self.hash_checks_mandatory,
            self.powerwash_required,
        );
        for partition in &self.partitions {
            let _ = write!(
                s,
                ", part: {} (source_size: {}, target_size: {})",
                partition.name, partition.source_size, partition.target_size
            );
        }
        s
    }
}

/// Source and target views of one named on-device filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Partition name, e.g. "root" or "kernel".
    pub name: String,

    /// Resolved source block device; `None` while unresolved or when the
    /// source slot is invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    /// Bytes of the source device covered by the delta.
    pub source_size: u64,
    /// Hash of the first `source_size` bytes of the source device;
    /// populated by the source hasher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<Hash>,

    /// Resolved target block device; `None` while unresolved or when the
    /// target slot is invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<PathBuf>,
    /// Bytes the applied update occupies on the target device.
    pub target_size: u64,
    /// Hash the first `target_size` bytes of the target device must match
    /// after application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_hash: Option<Hash>,

    /// Whether a post-install step runs for this partition.
    pub run_postinstall: bool,
}
