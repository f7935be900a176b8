#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the otad update agent
//!
//! This crate provides the data model threaded through the update pipeline:
//! the install plan, its partition records, and boot slot identifiers.

pub mod install_plan;
pub mod slot;

pub use install_plan::{InstallPlan, Partition, PARTITION_NAME_KERNEL, PARTITION_NAME_ROOT};
pub use slot::Slot;
