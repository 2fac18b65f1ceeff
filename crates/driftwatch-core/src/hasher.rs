//! Streaming SHA-256 content hashing.
//!
//! Files are read through a fixed-size buffer, so memory use does not grow with
//! file size. The digest is the only equality test for "content changed".

use crate::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Default buffer size for streaming reads (64KB)
pub const BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 digest of a file's full content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const HEX_LEN: usize = 64;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Digest of an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseHashError {
    #[error("expected {} hex characters, got {0}", ContentHash::HEX_LEN)]
    Length(usize),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != Self::HEX_LEN {
            return Err(ParseHashError::Length(s.len()));
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Streaming file hasher
#[derive(Debug, Clone)]
pub struct Hasher {
    buffer_size: usize,
}

impl Hasher {
    pub fn new() -> Self {
        Self::with_buffer_size(BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(512),
        }
    }

    /// Hash a file's full content.
    pub fn hash_file(&self, path: &Path) -> Result<ContentHash> {
        let file = File::open(path)?;
        let (hash, _) = self.hash_reader(file)?;
        Ok(hash)
    }

    /// Hash everything `reader` yields. Returns the digest and the number of
    /// bytes that went into it.
    pub fn hash_reader<R: Read>(&self, mut reader: R) -> Result<(ContentHash, u64)> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buffer[..n]);
                    total += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok((ContentHash(hasher.finalize().into()), total))
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
