//! Compilation units and source discovery.

mod unity;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{BuildError, BuildResult};

pub use unity::write_unity_chunks;

/// Source file extensions treated as translation units.
const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c"];

/// One translation unit and the outputs it produces.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompilationUnit {
    pub source: PathBuf,
    pub object: PathBuf,
    pub depfile: PathBuf,
}

impl CompilationUnit {
    pub fn new(
        source: impl Into<PathBuf>,
        object: impl Into<PathBuf>,
        depfile: impl Into<PathBuf>,
    ) -> Self {
        CompilationUnit {
            source: source.into(),
            object: object.into(),
            depfile: depfile.into(),
        }
    }

    /// Unit for `source`, with outputs in `obj_dir`.
    ///
    /// Outputs mirror the path relative to `root`, so `root/a/b.cpp` becomes
    /// `obj_dir/a/b.cpp.o` with depfile `obj_dir/a/b.cpp.d`. Distinct sources
    /// under one root therefore never share an object.
    pub fn for_source(source: &Path, root: &Path, obj_dir: &Path) -> Self {
        let relative = match source.strip_prefix(root) {
            Ok(relative) => relative.to_path_buf(),
            // Outside the root: keep only the file name.
            Err(_) => source.file_name().map(PathBuf::from).unwrap_or_default(),
        };
        let output = obj_dir.join(relative);
        CompilationUnit {
            source: source.to_path_buf(),
            object: with_suffix(&output, ".o"),
            depfile: with_suffix(&output, ".d"),
        }
    }

    /// Short display name: the source file name.
    pub fn name(&self) -> String {
        self.source
            .file_name()
            .map_or_else(|| self.source.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Find every source file under `dir`, sorted.
pub fn discover_sources(dir: &Path) -> BuildResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(BuildError::missing(dir, "source directory"));
    }
    let mut sources = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            BuildError::io(path, e.into())
        })?;
        if entry.file_type().is_file() && is_source(entry.path()) {
            sources.push(entry.into_path());
        }
    }
    sources.sort();
    Ok(sources)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
}

/// Newest modification time of any file under `dir`.
///
/// Headers count as much as sources here; this backs the library fast path.
pub fn newest_mtime(dir: &Path) -> Option<SystemTime> {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok()?.modified().ok())
        .max()
}

/// Units for `sources`, all rooted at `root` with outputs in `obj_dir`.
pub fn units_for(sources: &[PathBuf], root: &Path, obj_dir: &Path) -> Vec<CompilationUnit> {
    sources
        .iter()
        .map(|s| CompilationUnit::for_source(s, root, obj_dir))
        .collect()
}
