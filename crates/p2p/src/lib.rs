#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Peer-to-peer payload sharing support
//!
//! While a payload downloads, its bytes can be mirrored into a shared
//! directory that a local HTTP server exports to same-LAN peers. This crate
//! provides the content-addressed file naming, the narrow [`P2pManager`]
//! surface the download stage drives, and a directory-backed implementation.
//!
//! A share file is *hidden* until the payload's manifest has been
//! authenticated, then promoted to *visible* with an atomic rename. Peers
//! only ever see visible files, so they never serve bytes whose manifest
//! nobody has checked. A file never goes back from visible to hidden.

use otad_errors::{Error, Result, StorageError};
use otad_hash::Hash;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Extension of files peers are allowed to fetch.
const VISIBLE_EXTENSION: &str = "p2p";
/// Extension of files still being downloaded or not yet authenticated.
const HIDDEN_EXTENSION: &str = "tmp.p2p";

/// Content-addressed identifier of a payload in the share directory.
///
/// Derived from the pair that authenticates a payload, so two devices
/// downloading the same update agree on the name without coordination.
#[must_use]
pub fn file_id(payload_hash: &Hash, payload_size: u64) -> String {
    format!("update_size_{payload_size}_hash_{}", payload_hash.to_hex())
}

/// Management surface of the shared-payload store.
pub trait P2pManager: Send + Sync {
    /// Make `id` shareable: create (or keep) its file and reserve
    /// `expected_size` bytes. The file starts hidden if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or sized.
    fn file_share(&self, id: &str, expected_size: u64) -> Result<()>;

    /// Path of the file backing `id`, hidden or visible. `None` if no file
    /// exists.
    fn file_get_path(&self, id: &str) -> Option<PathBuf>;

    /// Whether the file backing `id` is visible to peers.
    ///
    /// # Errors
    ///
    /// Returns an error if no file backs `id`.
    fn file_get_visible(&self, id: &str) -> Result<bool>;

    /// Promote the file backing `id` from hidden to visible. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if no file backs `id` or the rename fails.
    fn file_make_visible(&self, id: &str) -> Result<()>;
}

/// [`P2pManager`] over a plain directory served by the p2p daemon.
#[derive(Debug, Clone)]
pub struct DirectoryShareManager {
    dir: PathBuf,
}

impl DirectoryShareManager {
    /// Use `dir` as the share directory. It must already exist.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The share directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn visible_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{VISIBLE_EXTENSION}"))
    }

    fn hidden_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{HIDDEN_EXTENSION}"))
    }
}

impl P2pManager for DirectoryShareManager {
    fn file_share(&self, id: &str, expected_size: u64) -> Result<()> {
        // A file promoted by an earlier attempt stays visible.
        let path = if self.visible_path(id).exists() {
            self.visible_path(id)
        } else {
            self.hidden_path(id)
        };

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io_with_path(&e, &path))?;

        // Reserve the full payload length up front so positioned writes
        // never land past the end of the file.
        let len = file.metadata().map_err(|e| Error::io_with_path(&e, &path))?.len();
        if len < expected_size {
            file.set_len(expected_size)
                .map_err(|e| Error::io_with_path(&e, &path))?;
        }
        Ok(())
    }

    fn file_get_path(&self, id: &str) -> Option<PathBuf> {
        let visible = self.visible_path(id);
        if visible.exists() {
            return Some(visible);
        }
        let hidden = self.hidden_path(id);
        hidden.exists().then_some(hidden)
    }

    fn file_get_visible(&self, id: &str) -> Result<bool> {
        if self.visible_path(id).exists() {
            return Ok(true);
        }
        if self.hidden_path(id).exists() {
            return Ok(false);
        }
        Err(StorageError::PathNotFound {
            path: self.hidden_path(id).display().to_string(),
        }
        .into())
    }

    fn file_make_visible(&self, id: &str) -> Result<()> {
        let visible = self.visible_path(id);
        if visible.exists() {
            return Ok(());
        }
        let hidden = self.hidden_path(id);
        fs::rename(&hidden, &visible).map_err(|e| Error::io_with_path(&e, &hidden))
    }
}
