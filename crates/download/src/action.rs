//! The payload download stage

use crate::payload::{PayloadState, PayloadWriter};
use crate::share::P2pShare;
use async_trait::async_trait;
use otad_errors::ErrorCode;
use otad_events::{Event, EventSender, EventSenderExt};
use otad_net::{
    FetchEvent, HttpFetcher, DOWNLOAD_P2P_CONNECT_TIMEOUT_SECONDS,
    DOWNLOAD_P2P_LOW_SPEED_LIMIT_BPS, DOWNLOAD_P2P_LOW_SPEED_TIME_SECONDS,
    DOWNLOAD_P2P_MAX_RETRY_COUNT,
};
use otad_p2p::P2pManager;
use otad_pipeline::{Action, ActionContext};
use otad_platform::BootControl;
use otad_types::InstallPlan;
use std::sync::Arc;

/// Streams the payload from the plan's URL into the payload writer,
/// mirroring the byte stream into the peer share file when sharing is on,
/// and finishes with the writer's cryptographic payload verification.
pub struct DownloadAction {
    fetcher: Box<dyn HttpFetcher>,
    writer: Box<dyn PayloadWriter>,
    boot_control: Arc<dyn BootControl>,
    payload_state: Arc<dyn PayloadState>,
    p2p_manager: Option<Arc<dyn P2pManager>>,

    bytes_received: u64,
    /// Writer failure latched during streaming; surfaced only once the
    /// fetcher has confirmed termination.
    code: ErrorCode,
    writer_closed: bool,
    share: Option<P2pShare>,
}

enum Wake {
    Cancelled,
    Fetch(Option<FetchEvent>),
}

impl DownloadAction {
    /// Wire a download stage to its collaborators. Pass `None` for
    /// `p2p_manager` on systems without peer sharing.
    #[must_use]
    pub fn new(
        fetcher: Box<dyn HttpFetcher>,
        writer: Box<dyn PayloadWriter>,
        boot_control: Arc<dyn BootControl>,
        payload_state: Arc<dyn PayloadState>,
        p2p_manager: Option<Arc<dyn P2pManager>>,
    ) -> Self {
        Self {
            fetcher,
            writer,
            boot_control,
            payload_state,
            p2p_manager,
            bytes_received: 0,
            code: ErrorCode::Success,
            writer_closed: false,
            share: None,
        }
    }

    /// Apply the start-of-download p2p policy and fetcher retuning.
    fn setup_p2p(&mut self, plan: &InstallPlan, events: &EventSender) {
        if let Some(manager) = self.p2p_manager.clone() {
            let file_id = otad_p2p::file_id(&plan.payload_hash, plan.payload_size);

            if self.payload_state.using_p2p_for_sharing() {
                events.emit(Event::DebugLog {
                    message: format!("p2p file id: {file_id}"),
                });
                self.share = Some(P2pShare::new(
                    manager,
                    events.clone(),
                    file_id,
                    plan.payload_size,
                ));
            } else if let Some(path) = manager.file_get_path(&file_id) {
                // A partial file from an earlier attempt would keep peers
                // waiting forever on bytes that are never coming.
                match std::fs::remove_file(&path) {
                    Ok(()) => events.emit(Event::P2pFileDeleted { path }),
                    Err(err) => events.emit(Event::Warning {
                        message: format!(
                            "error deleting stale shared payload file {}: {err}",
                            path.display()
                        ),
                    }),
                }
            }
        }

        // Downloading from a local peer: any progress counts, but a peer
        // that stops serving is dropped quickly.
        if self.payload_state.using_p2p_for_downloading()
            && self.payload_state.p2p_url().as_deref() == Some(plan.download_url.as_str())
        {
            events.emit(Event::DebugLog {
                message: "retuning fetcher for a peer download".to_string(),
            });
            self.fetcher.set_low_speed_limit(
                DOWNLOAD_P2P_LOW_SPEED_LIMIT_BPS,
                DOWNLOAD_P2P_LOW_SPEED_TIME_SECONDS,
            );
            self.fetcher
                .set_max_retry_count(DOWNLOAD_P2P_MAX_RETRY_COUNT);
            self.fetcher
                .set_connect_timeout(DOWNLOAD_P2P_CONNECT_TIMEOUT_SECONDS);
        }
    }

    /// Handle one chunk of payload bytes from the fetcher.
    fn received_bytes(&mut self, plan: &InstallPlan, bytes: &[u8], events: &EventSender) {
        if !self.code.is_success() {
            // Already unwinding after a writer failure; drop the bytes.
            return;
        }

        // Mirror first: bytes_received is still the chunk's offset.
        let share_lost = match self.share.as_mut() {
            Some(share) => !share.write(bytes, self.bytes_received),
            None => false,
        };
        if share_lost {
            self.share = None;
        }

        self.bytes_received += bytes.len() as u64;
        events.emit(Event::DownloadProgress {
            bytes_received: self.bytes_received,
            total_bytes: plan.payload_size,
        });

        if let Err(code) = self.writer.write(bytes) {
            events.emit(Event::Warning {
                message: format!(
                    "error {code} in the payload writer while processing received bytes; \
                     terminating processing"
                ),
            });
            self.code = code;
            if let Some(share) = self.share.as_mut() {
                share.close(true);
            }
            self.share = None;
            // Completion waits for the fetcher's terminated event so the
            // teardown never races remaining fetcher callbacks.
            self.close_writer(events);
            self.fetcher.terminate_transfer();
            return;
        }

        // Peers must never see a payload whose manifest nobody checked.
        if let Some(share) = self.share.as_mut() {
            if !share.is_visible() && self.writer.is_manifest_valid() {
                events.emit(Event::DebugLog {
                    message: "manifest has been validated; making shared payload visible"
                        .to_string(),
                });
                share.promote();
            }
        }
    }

    /// Handle the fetcher's own end of transfer.
    fn transfer_complete(
        &mut self,
        plan: InstallPlan,
        successful: bool,
        ctx: &mut ActionContext,
        events: &EventSender,
    ) -> ErrorCode {
        if !self.code.is_success() {
            return self.code;
        }

        self.close_writer(events);

        let mut code = if successful {
            ErrorCode::Success
        } else {
            ErrorCode::DownloadTransferError
        };
        if code.is_success() {
            code = self
                .writer
                .verify_payload(&plan.payload_hash, plan.payload_size);
            if !code.is_success() {
                events.emit(Event::Warning {
                    message: format!(
                        "download of {} failed due to payload verification error: {code}",
                        plan.download_url
                    ),
                });
                if let Some(share) = self.share.as_mut() {
                    share.close(true);
                }
                self.share = None;
            }
        }

        if code.is_success() {
            ctx.set_output(plan);
        }
        code
    }

    fn close_writer(&mut self, events: &EventSender) {
        if self.writer_closed {
            return;
        }
        self.writer_closed = true;
        if let Err(err) = self.writer.close() {
            events.emit(Event::Warning {
                message: format!("error closing the payload writer: {err}"),
            });
        }
    }
}

#[async_trait]
impl Action for DownloadAction {
    fn name(&self) -> &'static str {
        "download"
    }

    async fn perform(&mut self, ctx: &mut ActionContext) -> ErrorCode {
        let Some(plan) = ctx.take_input() else {
            ctx.events().emit(Event::Warning {
                message: "download action started without an install plan".to_string(),
            });
            return ErrorCode::Error;
        };
        let events = ctx.events().clone();
        events.emit(Event::DebugLog {
            message: plan.summary(),
        });

        self.bytes_received = 0;
        self.code = ErrorCode::Success;
        self.writer_closed = false;

        // A half-written slot must not be bootable. Failing to flag it is
        // not fatal; the update still verifies before the slot is re-armed.
        if let Err(err) = self.boot_control.mark_slot_unbootable(plan.target_slot) {
            events.emit(Event::Warning {
                message: format!(
                    "unable to mark slot {} unbootable: {err}; proceeding with the update anyway",
                    plan.target_slot
                ),
            });
        }

        // Inactive again on every exit path.
        let _status = DownloadStatusGuard::new(events.clone());

        self.setup_p2p(&plan, &events);

        events.emit(Event::DownloadStarted {
            url: plan.download_url.clone(),
            size: plan.payload_size,
        });
        self.fetcher.begin_transfer(&plan.download_url);

        let cancel = ctx.cancel_token().clone();
        let mut terminating = false;
        loop {
            let wake = tokio::select! {
                biased;
                () = cancel.cancelled(), if !terminating => Wake::Cancelled,
                event = self.fetcher.next_event() => Wake::Fetch(event),
            };
            match wake {
                Wake::Cancelled => {
                    // Voluntary stop: close the applier, keep the share
                    // file for a future resume, and let the fetcher unwind.
                    self.close_writer(&events);
                    if let Some(share) = self.share.as_mut() {
                        share.close(false);
                    }
                    self.share = None;
                    self.fetcher.terminate_transfer();
                    terminating = true;
                }
                Wake::Fetch(None) => {
                    // The fetcher went silent without a terminal event.
                    return ErrorCode::DownloadTransferError;
                }
                Wake::Fetch(Some(FetchEvent::SeekToOffset(offset))) => {
                    self.bytes_received = offset;
                }
                Wake::Fetch(Some(FetchEvent::Bytes(bytes))) => {
                    self.received_bytes(&plan, &bytes, &events);
                }
                Wake::Fetch(Some(FetchEvent::TransferComplete { successful })) => {
                    return self.transfer_complete(plan, successful, ctx, &events);
                }
                Wake::Fetch(Some(FetchEvent::TransferTerminated)) => {
                    // Surfaces a code latched during byte processing; a
                    // voluntary stop reports generic failure.
                    return if self.code.is_success() {
                        ErrorCode::Error
                    } else {
                        self.code
                    };
                }
            }
        }
    }
}

/// Emits the download-active flag on construction and clears it on drop, so
/// no exit path leaves the status stuck on active.
struct DownloadStatusGuard {
    events: EventSender,
}

impl DownloadStatusGuard {
    fn new(events: EventSender) -> Self {
        events.emit(Event::DownloadStatusChanged { active: true });
        Self { events }
    }
}

impl Drop for DownloadStatusGuard {
    fn drop(&mut self) {
        self.events.emit(Event::DownloadStatusChanged { active: false });
    }
}
