#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Payload download stage for the otad update pipeline
//!
//! [`DownloadAction`] consumes an install plan, streams the payload from its
//! URL through the [`PayloadWriter`] (the delta applier behind a narrow
//! seam), optionally mirrors the stream into a peer-to-peer share file, and
//! completes with the writer's cryptographic payload verification.

mod action;
mod payload;
mod share;

pub use action::DownloadAction;
pub use payload::{PayloadState, PayloadWriter};
