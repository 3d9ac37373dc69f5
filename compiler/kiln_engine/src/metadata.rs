//! Persisted per-stage metadata.
//!
//! Each stage writes one small JSON record after it succeeds. Records are
//! overwritten wholesale and never versioned; anything unreadable is treated
//! as if it were absent, which only ever causes extra rebuilds.

use std::fs;
use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, BuildResult};
use crate::flags::BuildMode;
use crate::hash::ContentHash;
use crate::stamp;

/// Outcome of loading an auxiliary file (metadata record or depfile).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuxFile<T> {
    Present(T),
    Missing,
    /// The file exists but could not be read or parsed.
    Malformed(String),
}

impl<T> AuxFile<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            AuxFile::Present(value) => Some(value),
            AuxFile::Missing | AuxFile::Malformed(_) => None,
        }
    }

    pub fn as_ref(&self) -> AuxFile<&T> {
        match self {
            AuxFile::Present(value) => AuxFile::Present(value),
            AuxFile::Missing => AuxFile::Missing,
            AuxFile::Malformed(msg) => AuxFile::Malformed(msg.clone()),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, AuxFile::Present(_))
    }
}

/// Read and decode a JSON record.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> AuxFile<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return AuxFile::Missing,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable metadata, ignoring");
            return AuxFile::Malformed(e.to_string());
        }
    };
    match serde_json::from_str(&text) {
        Ok(value) => AuxFile::Present(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt metadata, ignoring");
            AuxFile::Malformed(e.to_string())
        }
    }
}

/// Encode a record as pretty JSON and write it atomically.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> BuildResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| BuildError::io(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
    stamp::write_atomic(path, &json)
}

/// A metadata record stored as a JSON file.
pub trait MetadataFile: Serialize + DeserializeOwned {
    fn load(path: &Path) -> AuxFile<Self> {
        load_json(path)
    }

    fn save(&self, path: &Path) -> BuildResult<()> {
        save_json(path, self)
    }
}

/// Inputs a precompiled header was built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PchMetadata {
    pub header_content_hash: ContentHash,
    pub flags_hash: ContentHash,
    pub compiler_version: String,
}

impl MetadataFile for PchMetadata {}

/// Fast-path record for a compiled set of units.
///
/// Written for the library stage and, separately, for the sketch stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    pub flags_hash: ContentHash,
    pub build_mode: BuildMode,
    pub source_count: usize,
    pub object_count: usize,
}

impl MetadataFile for LibraryMetadata {}

/// Link flags the current artifact was linked with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub link_flags_hash: ContentHash,
}

impl MetadataFile for LinkMetadata {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_string;
    use pretty_assertions::assert_eq;

    fn sample() -> LibraryMetadata {
        LibraryMetadata {
            flags_hash: hash_string("-O2"),
            build_mode: BuildMode::Quick,
            source_count: 3,
            object_count: 3,
        }
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library_metadata.json");
        sample().save(&path).unwrap();

        assert_eq!(LibraryMetadata::load(&path), AuxFile::Present(sample()));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = PchMetadata::load(&dir.path().join("pch_metadata.json"));
        assert_eq!(loaded, AuxFile::Missing);
    }

    #[test]
    fn test_corrupt_file_is_malformed_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("link_metadata.json");
        fs::write(&path, "{ \"link_flags_hash\": 12").unwrap();

        let loaded = LinkMetadata::load(&path);
        assert!(matches!(loaded, AuxFile::Malformed(_)));
        assert_eq!(loaded.into_option(), None);
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pch_metadata.json");
        fs::write(&path, r#"{"header_content_hash": "zz"}"#).unwrap();
        assert!(matches!(PchMetadata::load(&path), AuxFile::Malformed(_)));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["build_mode"], "quick");
        assert_eq!(json["source_count"], 3);
        assert!(json["flags_hash"].is_string());
    }
}
