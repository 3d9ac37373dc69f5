//! Build directory layout and engine configuration.
//!
//! Nothing in the engine holds process-wide path state: every path a stage
//! reads or writes is derived from the [`BuildLayout`] it was given.

use std::path::{Path, PathBuf};

use crate::flags::BuildMode;

/// Every on-disk location, derived from one build directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildLayout {
    build_dir: PathBuf,
}

impl BuildLayout {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        BuildLayout {
            build_dir: build_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Library objects and their depfiles.
    pub fn obj_dir(&self) -> PathBuf {
        self.build_dir.join("obj")
    }

    /// Sketch objects and their depfiles.
    pub fn sketch_dir(&self) -> PathBuf {
        self.build_dir.join("sketch")
    }

    /// Generated unity chunks.
    pub fn unity_dir(&self) -> PathBuf {
        self.build_dir.join("unity")
    }

    pub fn pch_output(&self) -> PathBuf {
        self.build_dir.join("pch").join("precompiled.pch")
    }

    pub fn pch_depfile(&self) -> PathBuf {
        self.build_dir.join("pch").join("precompiled.pch.d")
    }

    pub fn pch_metadata(&self) -> PathBuf {
        self.build_dir.join("pch_metadata.json")
    }

    pub fn library_metadata(&self) -> PathBuf {
        self.build_dir.join("library_metadata.json")
    }

    pub fn sketch_metadata(&self) -> PathBuf {
        self.build_dir.join("sketch_metadata.json")
    }

    pub fn link_metadata(&self) -> PathBuf {
        self.build_dir.join("link_metadata.json")
    }

    fn lib_dir(&self) -> PathBuf {
        self.build_dir.join("lib")
    }

    /// The relocatable object every library object is merged into.
    pub fn merged_object(&self) -> PathBuf {
        self.lib_dir().join("libmerged.o")
    }

    /// Thin archive referencing [`merged_object`](Self::merged_object).
    pub fn archive(&self) -> PathBuf {
        self.lib_dir().join("liblibrary.a")
    }

    /// Response file listing the objects for the partial link.
    pub fn response_file(&self) -> PathBuf {
        self.lib_dir().join("objects.rsp")
    }

    /// The final `.js` artifact; the `.wasm` payload sits beside it.
    pub fn output_artifact(&self) -> PathBuf {
        self.build_dir.join("out").join("sketch.js")
    }
}

/// Explicit configuration for one engine run.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub layout: BuildLayout,
    pub library_dir: PathBuf,
    pub sketch_dir: PathBuf,
    /// Header to precompile; `None` disables the PCH stage.
    pub pch_header: Option<PathBuf>,
    pub mode: BuildMode,
    pub force: bool,
    /// Worker count; 0 means host parallelism.
    pub jobs: usize,
    /// Unity chunk count; 0 disables unity builds.
    pub unity_chunks: usize,
}

impl EngineConfig {
    pub fn new(
        library_dir: impl Into<PathBuf>,
        sketch_dir: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
    ) -> Self {
        EngineConfig {
            layout: BuildLayout::new(build_dir),
            library_dir: library_dir.into(),
            sketch_dir: sketch_dir.into(),
            pch_header: None,
            mode: BuildMode::default(),
            force: false,
            jobs: 0,
            unity_chunks: 0,
        }
    }

    #[must_use]
    pub fn with_pch_header(mut self, header: impl Into<PathBuf>) -> Self {
        self.pch_header = Some(header.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }

    #[must_use]
    pub fn with_unity_chunks(mut self, chunks: usize) -> Self {
        self.unity_chunks = chunks;
        self
    }
}
