//! Block-device and filesystem sizing
//!
//! Regular files report their length through metadata, block devices do not;
//! seeking to the end works for both and is what the verifier relies on for
//! kernel partitions. Root filesystems are sized from the ext superblock so
//! the hash covers exactly the filesystem, not the surrounding partition.

use otad_errors::{Error, PlatformError, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Byte offset of the ext superblock from the start of the filesystem.
const EXT_SUPERBLOCK_OFFSET: u64 = 1024;
/// Length of the superblock region holding the fields we read.
const EXT_SUPERBLOCK_LEN: usize = 64;
/// Value of `s_magic` for ext2/3/4.
const EXT_SUPERBLOCK_MAGIC: u16 = 0xEF53;

/// Geometry of an ext filesystem as recorded in its superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilesystemGeometry {
    /// Number of filesystem blocks.
    pub block_count: u64,
    /// Bytes per filesystem block.
    pub block_size: u64,
}

impl FilesystemGeometry {
    /// Total bytes the filesystem occupies.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.block_count * self.block_size
    }
}

/// Length in bytes of a file or block device.
///
/// # Errors
///
/// Returns an error if the path cannot be opened or seeked.
pub async fn device_size(path: &Path) -> Result<u64> {
    let inner = async {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::End(0)).await
    };
    inner.await.map_err(|e| {
        Error::from(PlatformError::DeviceSizeFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    })
}

/// Read the ext superblock of the filesystem at `path`.
///
/// # Errors
///
/// Returns an error if the device cannot be read or does not carry an ext
/// superblock with a plausible block size.
pub async fn filesystem_size(path: &Path) -> Result<FilesystemGeometry> {
    let mut file = File::open(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    file.seek(SeekFrom::Start(EXT_SUPERBLOCK_OFFSET))
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;

    let mut superblock = [0u8; EXT_SUPERBLOCK_LEN];
    file.read_exact(&mut superblock)
        .await
        .map_err(|_| not_ext(path))?;

    // s_magic, s_blocks_count_lo and s_log_block_size, little-endian.
    let magic = u16::from_le_bytes([superblock[56], superblock[57]]);
    if magic != EXT_SUPERBLOCK_MAGIC {
        return Err(not_ext(path));
    }

    let block_count = u64::from(u32::from_le_bytes([
        superblock[4],
        superblock[5],
        superblock[6],
        superblock[7],
    ]));
    let log_block_size = u32::from_le_bytes([
        superblock[24],
        superblock[25],
        superblock[26],
        superblock[27],
    ]);
    // ext block sizes range 1 KiB..=64 KiB.
    if log_block_size > 6 {
        return Err(not_ext(path));
    }
    let block_size = 1024u64 << log_block_size;

    Ok(FilesystemGeometry {
        block_count,
        block_size,
    })
}

fn not_ext(path: &Path) -> Error {
    PlatformError::SuperblockNotFound {
        path: path.display().to_string(),
    }
    .into()
}
