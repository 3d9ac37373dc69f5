//! Content hashing for change detection.
//!
//! Hashes are persisted in metadata files, so they must be stable across
//! processes and releases. XXH3-64 is used throughout; hashes serialize as
//! 16-digit lowercase hex strings.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::error::{BuildError, BuildResult};

/// A stable 64-bit content hash.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash(u64);

impl ContentHash {
    pub const fn new(value: u64) -> Self {
        ContentHash(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn to_hex(self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(ContentHash)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> String {
        hash.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ContentHash::from_hex(&s).ok_or_else(|| format!("invalid content hash '{s}'"))
    }
}

pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    ContentHash(xxh3_64(bytes))
}

pub fn hash_string(s: &str) -> ContentHash {
    hash_bytes(s.as_bytes())
}

/// Hash a file's contents without reading it into memory at once.
pub fn hash_file(path: &Path) -> BuildResult<ContentHash> {
    let mut file = File::open(path).map_err(|e| BuildError::io(path, e))?;
    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| BuildError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ContentHash(hasher.digest()))
}

/// Combine several hashes; order matters.
pub fn combine_hashes(hashes: &[ContentHash]) -> ContentHash {
    let mut hasher = Xxh3::new();
    for hash in hashes {
        hasher.update(&hash.0.to_le_bytes());
    }
    ContentHash(hasher.digest())
}

/// Hash a flag set canonically: entries are sorted, then space-joined.
///
/// Two flag sets that differ only in order hash the same.
pub fn hash_flag_set<S: AsRef<str>>(flags: &[S]) -> ContentHash {
    let mut sorted: Vec<&str> = flags.iter().map(AsRef::as_ref).collect();
    sorted.sort_unstable();
    hash_string(&sorted.join(" "))
}
