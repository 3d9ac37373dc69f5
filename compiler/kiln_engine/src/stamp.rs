//! File timestamps and atomic output placement.
//!
//! Freshness is decided by strict comparison: an output is stale only when an
//! input is strictly newer. Equal timestamps count as fresh.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{BuildError, BuildResult};
use crate::toolchain::Capability;

/// Modification time of `path`, or `None` if it does not exist.
pub fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Whether `input` exists and is strictly newer than `output`.
///
/// A missing `output` is handled by callers before they get here; a missing
/// `input` is never newer.
pub fn newer_than(input: &Path, output: SystemTime) -> bool {
    modified(input).is_some_and(|t| t > output)
}

/// Staging path for `target`: `foo.o` becomes `foo.o.partial`.
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

/// Move a staged tool output over its final path.
///
/// The tool has already reported success, so a missing staged file is a
/// contract violation rather than an I/O error.
pub fn promote_staged(
    capability: Capability,
    subject: &str,
    staged: &Path,
    target: &Path,
) -> BuildResult<()> {
    if !staged.exists() {
        return Err(BuildError::contract(capability, subject, target));
    }
    fs::rename(staged, target).map_err(|e| BuildError::io(target, e))
}

/// Write `contents` to `path` through a temporary file and rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> BuildResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let staged = staging_path(path);
    let result = fs::File::create(&staged)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staged, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&staged);
        return Err(BuildError::io(path, e));
    }
    Ok(())
}

pub fn ensure_dir(dir: &Path) -> BuildResult<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> BuildResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(path, e)),
    }
}
