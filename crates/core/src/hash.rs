//! BLAKE3 content identifiers for the deduplicated object store

use std::fmt;
use std::io;
use std::path::Path;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Read size for streaming file hashing
const BLOCK_SIZE: usize = 64 * 1024;

/// Files at or above this size are hashed through a memory map
const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// A content identifier: the BLAKE3 digest (32 bytes) of an object's bytes.
///
/// Two byte-identical files always produce the same id, independent of
/// path, timestamps, or permissions.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Create a ContentId from raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the id as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to a lowercase hex string (64 characters)
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(64);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(hex: &str) -> Result<Self, ParseIdError> {
        if hex.len() != 64 {
            return Err(ParseIdError::Length(hex.len()));
        }

        let mut bytes = [0u8; 32];
        for i in 0..32 {
            let high = hex_char_to_nibble(hex.as_bytes()[i * 2])?;
            let low = hex_char_to_nibble(hex.as_bytes()[i * 2 + 1])?;
            bytes[i] = (high << 4) | low;
        }
        Ok(Self(bytes))
    }

    /// First 8 hex characters, for compact display
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

/// Failure to parse a hex content id
#[derive(Debug, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid hex length: expected 64 characters, got {0}")]
    Length(usize),
    #[error("invalid hex character: {0}")]
    Char(char),
}

fn hex_char_to_nibble(c: u8) -> Result<u8, ParseIdError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(ParseIdError::Char(c as char)),
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_hex())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        ContentId::from_hex(&hex).map_err(D::Error::custom)
    }
}

/// Hash a byte slice
pub fn hash_bytes(data: &[u8]) -> ContentId {
    let hash = blake3::hash(data);
    ContentId::from_bytes(*hash.as_bytes())
}

/// Hash a file's content.
///
/// Content is read in fixed-size blocks so memory stays bounded regardless
/// of file size; files above 4 MiB go through a memory map instead.
pub fn hash_file(path: &Path) -> io::Result<ContentId> {
    let len = std::fs::metadata(path)?.len();
    if len >= MMAP_THRESHOLD {
        hash_file_mmap(path)
    } else {
        hash_file_streaming(path)
    }
}

/// Hash a file in fixed-size blocks
pub fn hash_file_streaming(path: &Path) -> io::Result<ContentId> {
    use std::fs::File;
    use std::io::{BufReader, Read};

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = [0u8; BLOCK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(ContentId::from_bytes(*hasher.finalize().as_bytes()))
}

/// Hash a file through a memory map
pub fn hash_file_mmap(path: &Path) -> io::Result<ContentId> {
    use memmap2::Mmap;
    use std::fs::File;

    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let hash = blake3::hash(&mmap);
    Ok(ContentId::from_bytes(*hash.as_bytes()))
}

/// Incremental hasher for folding a stream of chunks into one id
pub struct IncrementalHasher {
    inner: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    /// Update the digest state with more data
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the id
    pub fn finalize(self) -> ContentId {
        ContentId::from_bytes(*self.inner.finalize().as_bytes())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}
