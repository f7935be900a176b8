//! Boot-control interface: slot metadata and partition device resolution
//!
//! The real implementation talks to the bootloader (GPT attributes, vboot,
//! eMMC boot partitions). The pipeline only needs the narrow surface below.

use otad_errors::{Error, PlatformError, Result};
use otad_types::{InstallPlan, Slot};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// A/B slot metadata and device naming, as exposed by the bootloader.
pub trait BootControl: Send + Sync {
    /// Resolve the block device backing `name` in `slot`.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is invalid or the partition does not
    /// exist in it.
    fn partition_device(&self, name: &str, slot: Slot) -> Result<PathBuf>;

    /// Flag `slot` so the bootloader will not try it until the update
    /// finalizes.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot metadata could not be written.
    fn mark_slot_unbootable(&self, slot: Slot) -> Result<()>;
}

/// Resolve `source_path`/`target_path` for every partition in the plan.
///
/// A partition whose slot is invalid gets `None` for the corresponding path;
/// an unresolvable device on a valid slot is an error.
///
/// # Errors
///
/// Returns the first device-resolution failure.
pub fn load_partition_devices(plan: &mut InstallPlan, boot_control: &dyn BootControl) -> Result<()> {
    let (source_slot, target_slot) = (plan.source_slot, plan.target_slot);
    for partition in &mut plan.partitions {
        partition.source_path = if source_slot.is_valid() {
            Some(boot_control.partition_device(&partition.name, source_slot)?)
        } else {
            None
        };

        partition.target_path = if target_slot.is_valid() {
            Some(boot_control.partition_device(&partition.name, target_slot)?)
        } else {
            None
        };
    }
    Ok(())
}

/// In-memory [`BootControl`] backed by a partition table supplied up front.
///
/// Used by tests and by environments without a real bootloader; devices are
/// plain files standing in for block devices.
#[derive(Debug, Default)]
pub struct FakeBootControl {
    devices: HashMap<(String, Slot), PathBuf>,
    unbootable: Mutex<Vec<Slot>>,
    fail_mark_unbootable: bool,
}

impl FakeBootControl {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the device backing `name` in `slot`.
    pub fn set_device(&mut self, name: &str, slot: Slot, path: impl Into<PathBuf>) {
        self.devices.insert((name.to_string(), slot), path.into());
    }

    /// Make [`BootControl::mark_slot_unbootable`] fail, for exercising the
    /// proceed-anyway path.
    pub fn set_fail_mark_unbootable(&mut self, fail: bool) {
        self.fail_mark_unbootable = fail;
    }

    /// Slots marked unbootable so far, in call order.
    #[must_use]
    pub fn unbootable_slots(&self) -> Vec<Slot> {
        self.unbootable.lock().expect("lock poisoned").clone()
    }
}

impl BootControl for FakeBootControl {
    fn partition_device(&self, name: &str, slot: Slot) -> Result<PathBuf> {
        self.devices
            .get(&(name.to_string(), slot))
            .cloned()
            .ok_or_else(|| {
                Error::from(PlatformError::PartitionDeviceNotFound {
                    name: name.to_string(),
                    slot: slot.to_string(),
                })
            })
    }

    fn mark_slot_unbootable(&self, slot: Slot) -> Result<()> {
        if self.fail_mark_unbootable {
            return Err(PlatformError::MarkSlotUnbootableFailed {
                slot: slot.to_string(),
                message: "slot metadata write rejected".to_string(),
            }
            .into());
        }
        self.unbootable.lock().expect("lock poisoned").push(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otad_types::Partition;

    #[test]
    fn load_partition_devices_resolves_valid_slots_only() {
        let mut boot = FakeBootControl::new();
        boot.set_device("root", Slot::A, "/dev/sda3");
        boot.set_device("root", Slot::B, "/dev/sda5");

        let mut plan = InstallPlan {
            source_slot: Slot::INVALID,
            target_slot: Slot::B,
            partitions: vec![Partition {
                name: "root".to_string(),
                ..Partition::default()
            }],
            ..InstallPlan::default()
        };

        load_partition_devices(&mut plan, &boot).unwrap();
        assert_eq!(plan.partitions[0].source_path, None);
        assert_eq!(
            plan.partitions[0].target_path,
            Some(PathBuf::from("/dev/sda5"))
        );
    }

    #[test]
    fn load_partition_devices_fails_on_unknown_partition() {
        let boot = FakeBootControl::new();
        let mut plan = InstallPlan {
            source_slot: Slot::A,
            target_slot: Slot::B,
            partitions: vec![Partition {
                name: "oem".to_string(),
                ..Partition::default()
            }],
            ..InstallPlan::default()
        };
        assert!(load_partition_devices(&mut plan, &boot).is_err());
    }

    #[test]
    fn fake_records_unbootable_marks() {
        let boot = FakeBootControl::new();
        boot.mark_slot_unbootable(Slot::B).unwrap();
        assert_eq!(boot.unbootable_slots(), vec![Slot::B]);
    }
}
