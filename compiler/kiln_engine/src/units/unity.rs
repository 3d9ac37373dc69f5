//! Unity build chunk generation.
//!
//! Sources are split into contiguous chunks; each chunk is a generated
//! translation unit that `#include`s its sources by absolute path. The
//! originals then reach the rebuild decision through the chunk's depfile.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BuildError, BuildResult};
use crate::stamp;

/// Write `unity_<i>.cpp` files for `sources` split into `chunks` parts.
///
/// A chunk file is rewritten only when its content changes, so an
/// unchanged chunk keeps its mtime. Chunk files left over from a previous
/// larger chunk count are removed. Returns the chunk paths in order.
pub fn write_unity_chunks(
    sources: &[PathBuf],
    chunks: usize,
    unity_dir: &Path,
) -> BuildResult<Vec<PathBuf>> {
    stamp::ensure_dir(unity_dir)?;

    let mut written = Vec::new();
    if chunks > 0 && !sources.is_empty() {
        let per_chunk = sources.len().div_ceil(chunks);
        for (index, group) in sources.chunks(per_chunk).enumerate() {
            let path = unity_dir.join(format!("unity_{index}.cpp"));
            let contents = chunk_contents(group)?;
            if fs::read_to_string(&path).ok().as_deref() != Some(contents.as_str()) {
                tracing::debug!(chunk = %path.display(), sources = group.len(), "writing unity chunk");
                stamp::write_atomic(&path, contents.as_bytes())?;
            }
            written.push(path);
        }
    }

    remove_stale_chunks(unity_dir, &written)?;
    Ok(written)
}

fn chunk_contents(group: &[PathBuf]) -> BuildResult<String> {
    let mut contents = String::from("// Generated unity chunk. Do not edit.\n");
    for source in group {
        let absolute = std::path::absolute(source).map_err(|e| BuildError::io(source, e))?;
        let include = absolute.to_string_lossy().replace('\\', "/");
        let _ = writeln!(contents, "#include \"{include}\"");
    }
    Ok(contents)
}

fn remove_stale_chunks(unity_dir: &Path, keep: &[PathBuf]) -> BuildResult<()> {
    let entries = fs::read_dir(unity_dir).map_err(|e| BuildError::io(unity_dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| BuildError::io(unity_dir, e))?.path();
        let is_chunk = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("unity_") && n.ends_with(".cpp"));
        if is_chunk && !keep.contains(&path) {
            tracing::debug!(chunk = %path.display(), "removing stale unity chunk");
            stamp::remove_if_exists(&path)?;
        }
    }
    Ok(())
}
