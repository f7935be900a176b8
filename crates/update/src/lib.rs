#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Standard update pipeline assembly for otad
//!
//! Wires the three core stages into one processor: hash the delta's source
//! partitions, stream and apply the payload, then verify the freshly
//! written target partitions. The caller supplies the collaborators (HTTP
//! fetcher, payload applier, boot control, attempt state, optional peer
//! share manager) and an event channel, and receives the pipeline's final
//! completion code.

use otad_download::{DownloadAction, PayloadState, PayloadWriter};
use otad_errors::ErrorCode;
use otad_events::{Event, EventSender, EventSenderExt};
use otad_net::HttpFetcher;
use otad_p2p::P2pManager;
use otad_pipeline::ActionProcessor;
use otad_platform::BootControl;
use otad_types::InstallPlan;
use otad_verify::{FilesystemVerifierAction, VerifierMode};
use std::sync::Arc;

pub use otad_pipeline::ProcessorHandle;

/// The collaborators one update attempt runs against.
pub struct UpdateComponents {
    /// Payload byte source.
    pub fetcher: Box<dyn HttpFetcher>,
    /// Payload consumer (the delta applier).
    pub writer: Box<dyn PayloadWriter>,
    /// Bootloader slot metadata and device naming.
    pub boot_control: Arc<dyn BootControl>,
    /// Per-attempt p2p policy.
    pub payload_state: Arc<dyn PayloadState>,
    /// Peer share store; `None` on systems without peer sharing.
    pub p2p_manager: Option<Arc<dyn P2pManager>>,
}

/// Build the standard three-stage pipeline:
/// source hasher, downloader, target verifier.
#[must_use]
pub fn build_pipeline(components: UpdateComponents, events: EventSender) -> ActionProcessor {
    let mut processor = ActionProcessor::new(events);
    processor.enqueue_action(Box::new(FilesystemVerifierAction::new(
        Arc::clone(&components.boot_control),
        VerifierMode::ComputeSourceHash,
    )));
    processor.enqueue_action(Box::new(DownloadAction::new(
        components.fetcher,
        components.writer,
        Arc::clone(&components.boot_control),
        components.payload_state,
        components.p2p_manager,
    )));
    processor.enqueue_action(Box::new(FilesystemVerifierAction::new(
        components.boot_control,
        VerifierMode::VerifyTargetHash,
    )));
    processor
}

/// Run one update attempt to completion.
///
/// On a target verification failure the shared payload file is removed:
/// the bytes on disk demonstrably produced a bad install, so peers must
/// not be offered them either.
pub async fn run_update(
    plan: InstallPlan,
    components: UpdateComponents,
    events: &EventSender,
) -> ErrorCode {
    let p2p_manager = components.p2p_manager.clone();
    let file_id = otad_p2p::file_id(&plan.payload_hash, plan.payload_size);

    let code = build_pipeline(components, events.clone()).run(plan).await;

    if code == ErrorCode::NewRootfsVerificationError {
        if let Some(manager) = p2p_manager {
            if let Some(path) = manager.file_get_path(&file_id) {
                match std::fs::remove_file(&path) {
                    Ok(()) => events.emit(Event::P2pFileDeleted { path }),
                    Err(err) => events.emit(Event::Warning {
                        message: format!(
                            "error deleting shared payload file {}: {err}",
                            path.display()
                        ),
                    }),
                }
            }
        }
    }
    code
}
