//! Behavior tests for the filesystem verifier over fake block devices

use otad_errors::ErrorCode;
use otad_events::{channel, Event, EventReceiver};
use otad_hash::Hash;
use otad_pipeline::{Action, ActionContext, CancelToken};
use otad_platform::FakeBootControl;
use otad_types::{InstallPlan, Partition, Slot};
use otad_verify::{FilesystemVerifierAction, VerifierMode};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write_device(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// A minimal ext image: superblock at offset 1024 declaring
/// `block_count` 1 KiB blocks, embedded in a file of the full size.
fn write_ext_image(dir: &Path, name: &str, block_count: u32) -> (std::path::PathBuf, Vec<u8>) {
    let size = block_count as usize * 1024;
    let mut contents: Vec<u8> = (0u8..=255).cycle().take(size).collect();
    let superblock = &mut contents[1024..1088];
    superblock[..64].fill(0);
    superblock[4..8].copy_from_slice(&block_count.to_le_bytes());
    superblock[24..28].copy_from_slice(&0u32.to_le_bytes()); // 1 KiB blocks
    superblock[56..58].copy_from_slice(&0xEF53u16.to_le_bytes());
    let path = write_device(dir, name, &contents);
    (path, contents)
}

async fn run(
    action: &mut FilesystemVerifierAction,
    plan: InstallPlan,
    cancel: CancelToken,
) -> (ErrorCode, ActionContext, Vec<Event>) {
    let (tx, mut rx) = channel();
    let mut ctx = ActionContext::new(tx, cancel);
    ctx.set_input(plan);
    let code = action.perform(&mut ctx).await;
    (code, ctx, drain(&mut rx))
}

fn drain(rx: &mut EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn source_hashing_covers_the_declared_prefix() {
    let dir = TempDir::new().unwrap();
    let root_data: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    // The device is longer than the declared source size; only the prefix
    // is covered by the hash.
    let root_path = write_device(dir.path(), "root_a", &root_data);
    let kernel_data = vec![0xAAu8; 512];
    let kernel_path = write_device(dir.path(), "kernel_a", &kernel_data);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::A, &root_path);
    boot.set_device("kernel", Slot::A, &kernel_path);

    let plan = InstallPlan {
        source_slot: Slot::A,
        target_slot: Slot::B,
        partitions: vec![
            Partition {
                name: "root".to_string(),
                source_size: 1024,
                ..Partition::default()
            },
            Partition {
                name: "kernel".to_string(),
                source_size: 512,
                ..Partition::default()
            },
        ],
        ..InstallPlan::default()
    };

    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);
    let (code, mut ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);

    let plan = ctx.take_output().unwrap();
    assert_eq!(
        plan.partitions[0].source_hash,
        Some(Hash::from_data(&root_data[..1024]))
    );
    assert_eq!(
        plan.partitions[1].source_hash,
        Some(Hash::from_data(&kernel_data))
    );
}

#[tokio::test]
async fn source_hash_feeds_target_verification_round_trip() {
    let dir = TempDir::new().unwrap();
    let image: Vec<u8> = (0u8..=255).cycle().take(8192).collect();
    let source_path = write_device(dir.path(), "root_a", &image);
    let target_path = write_device(dir.path(), "root_b", &image);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::A, &source_path);
    boot.set_device("root", Slot::B, &target_path);
    let boot = Arc::new(boot);

    let plan = InstallPlan {
        source_slot: Slot::A,
        target_slot: Slot::B,
        partitions: vec![Partition {
            name: "root".to_string(),
            source_size: 8192,
            target_size: 8192,
            ..Partition::default()
        }],
        ..InstallPlan::default()
    };

    let mut source_hasher =
        FilesystemVerifierAction::new(boot.clone(), VerifierMode::ComputeSourceHash);
    let (code, mut ctx, _events) = run(&mut source_hasher, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);

    // Promise the target the hash we just computed over the same bytes.
    let mut plan = ctx.take_output().unwrap();
    plan.partitions[0].target_hash = plan.partitions[0].source_hash;

    let mut target_verifier =
        FilesystemVerifierAction::new(boot, VerifierMode::VerifyTargetHash);
    let (code, mut ctx, _events) = run(&mut target_verifier, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);
    assert!(ctx.take_output().is_some());
}

#[tokio::test]
async fn target_mismatch_is_a_rootfs_verification_error() {
    let dir = TempDir::new().unwrap();
    let mut image: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    let expected = Hash::from_data(&image);
    image[2048] ^= 0x01; // one flipped bit on the device
    let target_path = write_device(dir.path(), "root_b", &image);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::B, &target_path);

    let plan = InstallPlan {
        source_slot: Slot::A,
        target_slot: Slot::B,
        partitions: vec![Partition {
            name: "root".to_string(),
            target_size: 4096,
            target_hash: Some(expected),
            ..Partition::default()
        }],
        ..InstallPlan::default()
    };

    let mut action = FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::VerifyTargetHash);
    let (code, mut ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::NewRootfsVerificationError);
    assert!(ctx.take_output().is_none());
}

#[tokio::test]
async fn missing_target_hash_fails_verification() {
    let dir = TempDir::new().unwrap();
    let target_path = write_device(dir.path(), "root_b", &[0u8; 1024]);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::B, &target_path);

    let plan = InstallPlan {
        target_slot: Slot::B,
        partitions: vec![Partition {
            name: "root".to_string(),
            target_size: 1024,
            ..Partition::default()
        }],
        ..InstallPlan::default()
    };

    let mut action = FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::VerifyTargetHash);
    let (code, _ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::NewRootfsVerificationError);
}

#[tokio::test]
async fn partition_shorter_than_declared_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_device(dir.path(), "root_a", &[0u8; 1000]);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::A, &path);

    let plan = InstallPlan {
        source_slot: Slot::A,
        partitions: vec![Partition {
            name: "root".to_string(),
            source_size: 2048, // more than the device holds
            ..Partition::default()
        }],
        ..InstallPlan::default()
    };

    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);
    let (code, _ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::FilesystemVerifierError);
}

#[tokio::test]
async fn zero_sized_partition_is_skipped_without_a_device() {
    // No devices registered at all: resolving would fail, so success here
    // proves empty partitions never open anything.
    let boot = FakeBootControl::new();

    let plan = InstallPlan {
        source_slot: Slot::A,
        is_full_update: true,
        partitions: vec![Partition {
            name: "root".to_string(),
            source_size: 0,
            ..Partition::default()
        }],
        ..InstallPlan::default()
    };

    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);
    let (code, mut ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);
    assert_eq!(ctx.take_output().unwrap().partitions[0].source_hash, None);
}

#[tokio::test]
async fn unresolvable_device_is_fatal() {
    let boot = FakeBootControl::new();

    let plan = InstallPlan {
        source_slot: Slot::A,
        partitions: vec![Partition {
            name: "root".to_string(),
            source_size: 1024,
            ..Partition::default()
        }],
        ..InstallPlan::default()
    };

    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);
    let (code, _ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::FilesystemVerifierError);
}

#[tokio::test]
async fn legacy_delta_plan_synthesizes_root_and_kernel() {
    let dir = TempDir::new().unwrap();
    let (root_path, root_data) = write_ext_image(dir.path(), "root_a", 4);
    let kernel_data = vec![0x55u8; 2048];
    let kernel_path = write_device(dir.path(), "kernel_a", &kernel_data);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::A, &root_path);
    boot.set_device("kernel", Slot::A, &kernel_path);

    let plan = InstallPlan {
        is_full_update: false,
        source_slot: Slot::A,
        partitions: Vec::new(),
        ..InstallPlan::default()
    };

    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);
    let (code, mut ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);

    let plan = ctx.take_output().unwrap();
    assert_eq!(plan.partitions.len(), 2);

    let root = &plan.partitions[0];
    assert_eq!(root.name, "root");
    assert_eq!(root.source_size, 4096);
    assert_eq!(root.source_hash, Some(Hash::from_data(&root_data)));

    let kernel = &plan.partitions[1];
    assert_eq!(kernel.name, "kernel");
    assert_eq!(kernel.source_size, 2048);
    assert_eq!(kernel.source_hash, Some(Hash::from_data(&kernel_data)));
}

#[tokio::test]
async fn legacy_root_without_superblock_is_tolerated() {
    let dir = TempDir::new().unwrap();
    // Root device with no recognizable filesystem: its size stays zero and
    // it is skipped, like manifests that never hashed the root.
    let root_path = write_device(dir.path(), "root_a", &[0u8; 4096]);
    let kernel_data = vec![0x77u8; 1024];
    let kernel_path = write_device(dir.path(), "kernel_a", &kernel_data);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::A, &root_path);
    boot.set_device("kernel", Slot::A, &kernel_path);

    let plan = InstallPlan {
        is_full_update: false,
        source_slot: Slot::A,
        ..InstallPlan::default()
    };

    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);
    let (code, mut ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);

    let plan = ctx.take_output().unwrap();
    assert_eq!(plan.partitions[0].source_size, 0);
    assert_eq!(plan.partitions[0].source_hash, None);
    assert_eq!(plan.partitions[1].source_hash, Some(Hash::from_data(&kernel_data)));
}

#[tokio::test]
async fn full_update_with_no_partitions_completes_immediately() {
    let boot = FakeBootControl::new();
    let plan = InstallPlan {
        is_full_update: true,
        source_slot: Slot::INVALID,
        ..InstallPlan::default()
    };

    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);
    let (code, mut ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);
    assert!(ctx.take_output().unwrap().partitions.is_empty());
}

#[tokio::test]
async fn target_mode_never_synthesizes_partitions() {
    let boot = FakeBootControl::new();
    let plan = InstallPlan {
        is_full_update: false,
        source_slot: Slot::A,
        ..InstallPlan::default()
    };

    let mut action = FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::VerifyTargetHash);
    let (code, mut ctx, _events) = run(&mut action, plan, CancelToken::new()).await;
    assert_eq!(code, ErrorCode::Success);
    assert!(ctx.take_output().unwrap().partitions.is_empty());
}

#[tokio::test]
async fn cancellation_short_circuits_partition_hashing() {
    let dir = TempDir::new().unwrap();
    let path = write_device(dir.path(), "root_b", &[0u8; 4096]);

    let mut boot = FakeBootControl::new();
    boot.set_device("root", Slot::B, &path);

    let plan = InstallPlan {
        target_slot: Slot::B,
        partitions: vec![Partition {
            name: "root".to_string(),
            target_size: 4096,
            target_hash: Some(Hash::from_data(&[0u8; 4096])),
            ..Partition::default()
        }],
        ..InstallPlan::default()
    };

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut action = FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::VerifyTargetHash);
    let (code, mut ctx, _events) = run(&mut action, plan, cancel).await;
    assert_eq!(code, ErrorCode::Error);
    assert!(ctx.take_output().is_none());
}

#[tokio::test]
async fn missing_input_plan_fails() {
    let boot = FakeBootControl::new();
    let mut action =
        FilesystemVerifierAction::new(Arc::new(boot), VerifierMode::ComputeSourceHash);

    let (tx, _rx) = channel();
    let mut ctx = ActionContext::new(tx, CancelToken::new());
    let code = action.perform(&mut ctx).await;
    assert_eq!(code, ErrorCode::Error);
}
