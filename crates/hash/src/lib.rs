#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Payload and partition hashing for otad
//!
//! This crate provides the hash value type used throughout the update
//! pipeline and a streaming accumulator for hashing data that arrives in
//! chunks (HTTP payload bytes, partition reads). The update manifest fixes
//! the hash identity; this implementation fixes it to BLAKE3-256.

use blake3::Hasher as Blake3Hasher;
use otad_errors::{Error, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;


/// Length in bytes of every hash this crate produces.
pub const HASH_LEN: usize = 32;

/// Size of chunks for streaming hash computation
const CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// A 256-bit payload or partition hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash {
    bytes: [u8; HASH_LEN],
}

impl Hash {
    /// Create a hash from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Parse from hex string
    ///
    /// # Errors
    /// Returns an error if the input is not valid hexadecimal or has the
    /// wrong length.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let bytes = hex::decode(s).map_err(|e| StorageError::CorruptedData {
            message: format!("invalid hex: {e}"),
        })?;

        if bytes.len() != HASH_LEN {
            return Err(StorageError::CorruptedData {
                message: format!("hash must be {HASH_LEN} bytes, got {}", bytes.len()),
            }
            .into());
        }

        let mut array = [0u8; HASH_LEN];
        array.copy_from_slice(&bytes);
        Ok(Self::from_bytes(array))
    }

    /// Compute the hash of a byte slice
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self::from_bytes(*blake3::hash(data).as_bytes())
    }

    /// Compute the hash of a file's full contents
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, read, or if any I/O
    /// operation fails.
    pub async fn hash_file(path: &Path) -> Result<Self, Error> {
        let mut file = File::open(path)
            .await
            .map_err(|_| StorageError::PathNotFound {
                path: path.display().to_string(),
            })?;

        let mut hasher = Hasher::new();
        let mut buffer = vec![0; CHUNK_SIZE];

        loop {
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(hasher.finalize())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Streaming hash accumulator for data that arrives in chunks.
///
/// Feed bytes with [`Hasher::update`] in arrival order, then call
/// [`Hasher::finalize`]; the result equals [`Hash::from_data`] over the
/// concatenated input.
#[derive(Debug, Default)]
pub struct Hasher {
    inner: Blake3Hasher,
}

impl Hasher {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Blake3Hasher::new(),
        }
    }

    /// Feed a chunk of data
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and produce the hash
    #[must_use]
    pub fn finalize(self) -> Hash {
        Hash::from_bytes(*self.inner.finalize().as_bytes())
    }
}

/// Verify a file matches an expected hash
///
/// # Errors
/// Returns an error if the file cannot be read or hashed.
pub async fn verify_file(path: &Path, expected: &Hash) -> Result<bool, Error> {
    let actual = Hash::hash_file(path).await?;
    Ok(actual == *expected)
}
