#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Payload transfer for the otad update agent
//!
//! The download stage consumes an [`HttpFetcher`]: an event source that
//! yields payload bytes in offset order plus exactly one terminal event per
//! transfer. [`HttpTransferFetcher`] is the production implementation on top
//! of reqwest, with mid-transfer resume, bounded retries and a low-speed
//! stall cutoff; tests substitute scripted fetchers.

mod config;
mod http;

pub use config::FetchConfig;
pub use http::HttpTransferFetcher;

use async_trait::async_trait;
use bytes::Bytes;

/// Fetcher tuning applied when downloading from a local peer: any progress
/// at all counts, but a peer that stops serving is dropped quickly.
pub const DOWNLOAD_P2P_LOW_SPEED_LIMIT_BPS: u32 = 1;
/// Seconds below the low-speed limit before a peer transfer is cut off.
pub const DOWNLOAD_P2P_LOW_SPEED_TIME_SECONDS: u32 = 30;
/// Retry budget for transfers from a local peer.
pub const DOWNLOAD_P2P_MAX_RETRY_COUNT: u32 = 5;
/// Connect timeout for transfers from a local peer.
pub const DOWNLOAD_P2P_CONNECT_TIMEOUT_SECONDS: u32 = 5;

/// One observation from an in-flight transfer.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    /// The next [`FetchEvent::Bytes`] continues at this payload offset.
    /// Emitted before data when a transfer resumes mid-payload.
    SeekToOffset(u64),
    /// A chunk of payload bytes, in offset order.
    Bytes(Bytes),
    /// The transfer ended on its own. Exactly one of `TransferComplete` or
    /// `TransferTerminated` is delivered per transfer.
    TransferComplete {
        /// Whether the server delivered the payload successfully.
        successful: bool,
    },
    /// The transfer ended because [`HttpFetcher::terminate_transfer`] was
    /// requested.
    TransferTerminated,
}

/// A byte source for one payload transfer.
///
/// Protocol: configure, then `begin_transfer`, then pull [`FetchEvent`]s via
/// `next_event` until a terminal event ([`FetchEvent::TransferComplete`] or
/// [`FetchEvent::TransferTerminated`]) arrives; afterwards `next_event`
/// returns `None`. `terminate_transfer` may be called between pulls at any
/// time; the terminal event it causes is still delivered through
/// `next_event`.
#[async_trait]
pub trait HttpFetcher: Send {
    /// Treat the transfer as stalled when it moves fewer than `bps` bytes
    /// per second for `seconds` seconds.
    fn set_low_speed_limit(&mut self, bps: u32, seconds: u32);

    /// Budget of transparent retries before the transfer fails.
    fn set_max_retry_count(&mut self, count: u32);

    /// Timeout for establishing the connection.
    fn set_connect_timeout(&mut self, seconds: u32);

    /// Start transferring from `url`. Bytes arrive through `next_event`.
    fn begin_transfer(&mut self, url: &str);

    /// Request the transfer to stop. `next_event` will deliver
    /// [`FetchEvent::TransferTerminated`].
    fn terminate_transfer(&mut self);

    /// Pull the next transfer event; `None` once the transfer is over.
    async fn next_event(&mut self) -> Option<FetchEvent>;
}
