//! Mirroring the download into the peer-to-peer share file

use otad_errors::{Error, Result, StorageError};
use otad_events::{Event, EventSender, EventSenderExt};
use otad_p2p::P2pManager;
use std::fs::{File, OpenOptions, Permissions};
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::sync::Arc;

/// One payload's share file, written in lockstep with the download.
///
/// The file is opened lazily on the first mirrored byte and owned until the
/// transfer ends. Any write-side problem abandons sharing for the rest of
/// the transfer and deletes the file, so a bad copy never lingers where
/// peers can fetch it.
pub(crate) struct P2pShare {
    manager: Arc<dyn P2pManager>,
    events: EventSender,
    file_id: String,
    payload_size: u64,
    file: Option<File>,
    visible: bool,
}

impl P2pShare {
    pub(crate) fn new(
        manager: Arc<dyn P2pManager>,
        events: EventSender,
        file_id: String,
        payload_size: u64,
    ) -> Self {
        Self {
            manager,
            events,
            file_id,
            payload_size,
            // Stays true until the file is open and known hidden, which
            // keeps promotion a no-op before any byte is mirrored.
            visible: true,
            file: None,
        }
    }

    pub(crate) fn is_visible(&self) -> bool {
        self.visible
    }

    /// Mirror `data` at `file_offset`.
    ///
    /// Returns `false` once sharing has been abandoned; the file is already
    /// closed and deleted and the caller must stop mirroring.
    pub(crate) fn write(&mut self, data: &[u8], file_offset: u64) -> bool {
        if self.file.is_none() && !self.open_file() {
            return false;
        }
        let Some(file) = self.file.as_ref() else {
            return false;
        };

        // The file must already span the write offset. A shorter file means
        // it was truncated or replaced behind our back (crash before sync,
        // cache cleanup, ...) and resuming into it would hand peers a
        // corrupted payload.
        let current_len = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                self.abandon(format!("error getting shared payload file status: {err}"));
                return false;
            }
        };
        if current_len < file_offset {
            self.abandon(
                StorageError::SharedFileTruncated {
                    actual: current_len,
                    offset: file_offset,
                }
                .to_string(),
            );
            return false;
        }

        if let Err(err) = file.write_all_at(data, file_offset) {
            self.abandon(format!(
                "error writing {} bytes at offset {file_offset} in shared payload file: {err}",
                data.len()
            ));
            return false;
        }
        true
    }

    /// Promote the file from hidden to visible. One-shot; peers may fetch
    /// it from here on.
    pub(crate) fn promote(&mut self) {
        if let Err(err) = self.manager.file_make_visible(&self.file_id) {
            self.events.emit(Event::Warning {
                message: format!("error making shared payload visible: {err}"),
            });
        } else {
            self.events.emit(Event::P2pFileVisible {
                file_id: self.file_id.clone(),
            });
        }
        self.visible = true;
    }

    /// Close the file descriptor, deleting the backing file when asked.
    ///
    /// Deletion is for error paths; a voluntary stop keeps the file so a
    /// future attempt can resume sharing it.
    pub(crate) fn close(&mut self, delete_file: bool) {
        self.file = None;
        if delete_file {
            if let Some(path) = self.manager.file_get_path(&self.file_id) {
                match std::fs::remove_file(&path) {
                    Ok(()) => self.events.emit(Event::P2pFileDeleted { path }),
                    Err(err) => self.events.emit(Event::Warning {
                        message: format!(
                            "error deleting shared payload file {}: {err}",
                            path.display()
                        ),
                    }),
                }
            }
        }
    }

    /// Allocate, open and tag the share file.
    fn open_file(&mut self) -> bool {
        match self.try_open_file() {
            Ok(()) => true,
            Err(err) => {
                self.abandon(format!("unable to share payload with peers: {err}"));
                false
            }
        }
    }

    fn try_open_file(&mut self) -> Result<()> {
        self.manager.file_share(&self.file_id, self.payload_size)?;

        // The manager has created and sized the file; open it for the
        // positioned writes.
        let path = self
            .manager
            .file_get_path(&self.file_id)
            .ok_or_else(|| {
                Error::from(StorageError::PathNotFound {
                    path: self.file_id.clone(),
                })
            })?;
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| Error::io_with_path(&e, &path))?;

        // The agent runs with a restrictive umask; the p2p servers need the
        // file world-readable to export it.
        file.set_permissions(Permissions::from_mode(0o644))
            .map_err(|e| Error::io_with_path(&e, &path))?;

        self.visible = self.manager.file_get_visible(&self.file_id)?;
        self.events.emit(Event::P2pFileShared {
            file_id: self.file_id.clone(),
            path,
        });
        self.file = Some(file);
        Ok(())
    }

    fn abandon(&mut self, reason: String) {
        self.events.emit(Event::P2pShareAborted { reason });
        self.close(true);
    }
}
