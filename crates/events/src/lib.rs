#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in otad
//!
//! This crate provides the event types and channel aliases used for
//! communication between crates. All output goes through events - no
//! direct logging or printing is allowed outside the front end.

use otad_errors::ErrorCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Type alias for event sender
pub type EventSender = tokio::sync::mpsc::UnboundedSender<Event>;

/// Type alias for event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<Event>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Core event enum for all async communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Pipeline lifecycle
    ActionStarted {
        action: String,
    },
    ActionCompleted {
        action: String,
        code: ErrorCode,
    },

    // Download progress
    DownloadStatusChanged {
        active: bool,
    },
    DownloadStarted {
        url: String,
        size: u64,
    },
    DownloadProgress {
        bytes_received: u64,
        total_bytes: u64,
    },

    // Peer-to-peer payload sharing
    P2pFileShared {
        file_id: String,
        path: PathBuf,
    },
    P2pFileVisible {
        file_id: String,
    },
    P2pFileDeleted {
        path: PathBuf,
    },
    P2pShareAborted {
        reason: String,
    },

    // Partition hashing
    PartitionHashStarted {
        partition: String,
        device: PathBuf,
    },
    PartitionHashed {
        partition: String,
        hash: String,
    },

    // Diagnostics
    Warning {
        message: String,
    },
    DebugLog {
        message: String,
    },
}

/// Extension trait for fire-and-forget event emission
pub trait EventSenderExt {
    /// Send an event, dropping it if the receiver is gone.
    fn emit(&self, event: Event);
}

impl EventSenderExt for EventSender {
    fn emit(&self, event: Event) {
        // The receiver disappearing (e.g. front end shut down) must never
        // fail the pipeline.
        let _ = self.send(event);
    }
}
