#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Partition hashing and verification for the otad update pipeline
//!
//! [`FilesystemVerifierAction`] hashes each partition's block device in
//! order, chunk by chunk. Before the download it runs in
//! [`VerifierMode::ComputeSourceHash`] to authenticate the delta's source
//! partitions; after the download it runs in
//! [`VerifierMode::VerifyTargetHash`] to prove the freshly written targets
//! match what the install plan promised.

use async_trait::async_trait;
use otad_errors::ErrorCode;
use otad_events::{Event, EventSender, EventSenderExt};
use otad_hash::Hasher;
use otad_pipeline::{Action, ActionContext, CancelToken};
use otad_platform::BootControl;
use otad_types::{InstallPlan, Partition, PARTITION_NAME_KERNEL, PARTITION_NAME_ROOT};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Read granularity for partition hashing.
pub const READ_FILE_BUFFER_SIZE: usize = 128 * 1024;

/// What the verifier does with each partition's hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierMode {
    /// Hash the source slot's devices and record the results in the plan.
    ComputeSourceHash,
    /// Hash the target slot's devices and compare against the plan.
    VerifyTargetHash,
}

/// Hashes partition devices sequentially and records or checks the result
/// per [`VerifierMode`].
pub struct FilesystemVerifierAction {
    mode: VerifierMode,
    boot_control: Arc<dyn BootControl>,
}

impl FilesystemVerifierAction {
    /// Create a verifier stage for `mode`.
    #[must_use]
    pub fn new(boot_control: Arc<dyn BootControl>, mode: VerifierMode) -> Self {
        Self { mode, boot_control }
    }

    /// Build "root" and "kernel" entries for a delta plan whose legacy
    /// manifest carried no partition list.
    ///
    /// The root filesystem is sized from its superblock so the hash covers
    /// exactly the filesystem; the kernel partition is raw and sized by the
    /// device itself. An unreadable root superblock leaves that size at
    /// zero, matching manifests that never hashed the root.
    async fn synthesize_legacy_partitions(
        &self,
        plan: &mut InstallPlan,
        events: &EventSender,
    ) -> Result<(), ErrorCode> {
        events.emit(Event::DebugLog {
            message: "using legacy partition names".to_string(),
        });

        let root_path = self
            .boot_control
            .partition_device(PARTITION_NAME_ROOT, plan.source_slot)
            .map_err(|err| {
                events.emit(Event::Warning {
                    message: format!("unable to resolve the legacy root partition: {err}"),
                });
                ErrorCode::Error
            })?;
        let mut root = Partition {
            name: PARTITION_NAME_ROOT.to_string(),
            ..Partition::default()
        };
        match otad_platform::filesystem_size(&root_path).await {
            Ok(geometry) => {
                root.source_size = geometry.bytes();
                events.emit(Event::DebugLog {
                    message: format!(
                        "partition {} size: {} bytes ({}x{})",
                        root.name,
                        root.source_size,
                        geometry.block_count,
                        geometry.block_size
                    ),
                });
            }
            Err(err) => events.emit(Event::Warning {
                message: format!("unable to size the root filesystem: {err}"),
            }),
        }
        plan.partitions.push(root);

        let kernel_path = self
            .boot_control
            .partition_device(PARTITION_NAME_KERNEL, plan.source_slot)
            .map_err(|err| {
                events.emit(Event::Warning {
                    message: format!("unable to resolve the legacy kernel partition: {err}"),
                });
                ErrorCode::Error
            })?;
        let kernel_size = otad_platform::device_size(&kernel_path)
            .await
            .map_err(|err| {
                events.emit(Event::Warning {
                    message: format!("unable to size the kernel partition: {err}"),
                });
                ErrorCode::Error
            })?;
        events.emit(Event::DebugLog {
            message: format!("partition {PARTITION_NAME_KERNEL} size: {kernel_size} bytes"),
        });
        plan.partitions.push(Partition {
            name: PARTITION_NAME_KERNEL.to_string(),
            source_size: kernel_size,
            ..Partition::default()
        });
        Ok(())
    }

    /// Hash one partition's device and record or compare the result.
    async fn hash_partition(
        &self,
        plan: &mut InstallPlan,
        index: usize,
        events: &EventSender,
        cancel: &CancelToken,
    ) -> Result<(), ErrorCode> {
        let (name, size, slot) = {
            let partition = &plan.partitions[index];
            match self.mode {
                VerifierMode::ComputeSourceHash => {
                    (partition.name.clone(), partition.source_size, plan.source_slot)
                }
                VerifierMode::VerifyTargetHash => {
                    (partition.name.clone(), partition.target_size, plan.target_slot)
                }
            }
        };

        if size == 0 {
            // Nothing to hash, and no reason to even open the device.
            events.emit(Event::DebugLog {
                message: format!("partition {name} is empty, skipping"),
            });
            return Ok(());
        }

        let path = self
            .boot_control
            .partition_device(&name, slot)
            .map_err(|err| {
                events.emit(Event::Warning {
                    message: format!("unable to resolve partition {name}: {err}"),
                });
                ErrorCode::FilesystemVerifierError
            })?;
        events.emit(Event::PartitionHashStarted {
            partition: name.clone(),
            device: path.clone(),
        });

        let mut file = File::open(&path).await.map_err(|err| {
            events.emit(Event::Warning {
                message: format!("unable to open {} for reading: {err}", path.display()),
            });
            ErrorCode::FilesystemVerifierError
        })?;

        let mut buffer = vec![0u8; READ_FILE_BUFFER_SIZE];
        let mut hasher = Hasher::new();
        let mut remaining = size;

        while remaining > 0 {
            if cancel.is_cancelled() {
                return Err(ErrorCode::Error);
            }
            let want = buffer
                .len()
                .min(usize::try_from(remaining).unwrap_or(buffer.len()));
            let read = file.read(&mut buffer[..want]).await.map_err(|err| {
                events.emit(Event::Warning {
                    message: format!("read error on {}: {err}", path.display()),
                });
                ErrorCode::Error
            })?;
            if read == 0 {
                // The device is shorter than the plan claims.
                events.emit(Event::Warning {
                    message: format!(
                        "failed to read the remaining {remaining} bytes from partition {name}"
                    ),
                });
                return Err(ErrorCode::FilesystemVerifierError);
            }
            hasher.update(&buffer[..read]);
            remaining -= read as u64;
        }
        if cancel.is_cancelled() {
            return Err(ErrorCode::Error);
        }

        let hash = hasher.finalize();
        events.emit(Event::PartitionHashed {
            partition: name.clone(),
            hash: hash.to_hex(),
        });

        let partition = &mut plan.partitions[index];
        match self.mode {
            VerifierMode::ComputeSourceHash => partition.source_hash = Some(hash),
            VerifierMode::VerifyTargetHash => {
                if partition.target_hash != Some(hash) {
                    events.emit(Event::Warning {
                        message: format!("new '{name}' partition verification failed"),
                    });
                    return Err(ErrorCode::NewRootfsVerificationError);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Action for FilesystemVerifierAction {
    fn name(&self) -> &'static str {
        "filesystem_verifier"
    }

    async fn perform(&mut self, ctx: &mut ActionContext) -> ErrorCode {
        let Some(mut plan) = ctx.take_input() else {
            ctx.events().emit(Event::Warning {
                message: "filesystem verifier started without an install plan".to_string(),
            });
            return ErrorCode::Error;
        };
        let events = ctx.events().clone();
        let cancel = ctx.cancel_token().clone();

        // Delta updates under a legacy manifest never name their
        // partitions; synthesize the entries before hashing sources.
        if plan.partitions.is_empty()
            && !plan.is_full_update
            && self.mode == VerifierMode::ComputeSourceHash
        {
            if let Err(code) = self.synthesize_legacy_partitions(&mut plan, &events).await {
                return code;
            }
        }

        if plan.partitions.is_empty() {
            events.emit(Event::DebugLog {
                message: "no partitions to verify".to_string(),
            });
            ctx.set_output(plan);
            return ErrorCode::Success;
        }

        for index in 0..plan.partitions.len() {
            if let Err(code) = self.hash_partition(&mut plan, index, &events, &cancel).await {
                return code;
            }
        }

        ctx.set_output(plan);
        ErrorCode::Success
    }
}
