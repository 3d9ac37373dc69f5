//! The build orchestrator.
//!
//! Runs the stage chain in order on the calling thread:
//!
//! ```text
//! flags → pch → library compile → partial link + archive → sketch compile → link
//! ```
//!
//! Each stage decides its own freshness, and the orchestrator adds the
//! downstream forcing that timestamps alone cannot guarantee: any library
//! compile forces the partial link, and a rebuilt archive or any sketch
//! compile forces the final link.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::archive::{ArchiveOutcome, LibraryArchiver};
use crate::cancel::CancelToken;
use crate::compile::{fast_path_applies, CompileReport, FastPathInputs, ParallelCompiler};
use crate::error::{BuildError, BuildResult};
use crate::flags::{BuildFlags, FlagsProvider};
use crate::layout::{BuildLayout, EngineConfig};
use crate::link::{FinalLinker, LinkOutcome};
use crate::metadata::{LibraryMetadata, MetadataFile};
use crate::pch::{PchArtifact, PchManager, PchOutcome};
use crate::rebuild::DecisionEngine;
use crate::stamp;
use crate::toolchain::Toolchain;
use crate::units::{discover_sources, newest_mtime, units_for, write_unity_chunks, CompilationUnit};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Flags,
    Pch,
    LibraryCompile,
    Archive,
    SketchCompile,
    Link,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Flags => "flags",
            Stage::Pch => "precompiled header",
            Stage::LibraryCompile => "library compile",
            Stage::Archive => "partial link + archive",
            Stage::SketchCompile => "sketch compile",
            Stage::Link => "link",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration: Duration,
}

/// Everything one run did.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub pch: Option<PchOutcome>,
    pub library: CompileReport,
    /// `None` when the library fast path skipped the stage.
    pub archive: Option<ArchiveOutcome>,
    pub sketch: CompileReport,
    pub link: Option<LinkOutcome>,
    /// Stages that ran, in order.
    pub timings: Vec<StageTiming>,
    pub duration: Duration,
}

impl BuildReport {
    pub fn compiled_count(&self) -> usize {
        self.library.compiled.len() + self.sketch.compiled.len()
    }

    pub fn up_to_date_count(&self) -> usize {
        self.library.up_to_date.len() + self.sketch.up_to_date.len()
    }

    pub fn total_units(&self) -> usize {
        self.library.total() + self.sketch.total()
    }

    pub fn archive_rebuilt(&self) -> bool {
        self.archive.as_ref().is_some_and(ArchiveOutcome::rebuilt)
    }

    pub fn linked(&self) -> bool {
        self.link.as_ref().is_some_and(LinkOutcome::linked)
    }
}

pub struct BuildPipeline<'a> {
    config: &'a EngineConfig,
    toolchain: &'a dyn Toolchain,
    flags: &'a dyn FlagsProvider,
    cancel: CancelToken,
}

impl<'a> BuildPipeline<'a> {
    pub fn new(
        config: &'a EngineConfig,
        toolchain: &'a dyn Toolchain,
        flags: &'a dyn FlagsProvider,
    ) -> Self {
        BuildPipeline {
            config,
            toolchain,
            flags,
            cancel: CancelToken::new(),
        }
    }

    /// Share `cancel` with whoever may interrupt the build.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn layout(&self) -> &BuildLayout {
        &self.config.layout
    }

    fn checkpoint(&self) -> BuildResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(mode = %self.config.mode))]
    pub fn run(&self) -> BuildResult<BuildReport> {
        let start = Instant::now();
        let mut report = BuildReport::default();
        let config = self.config;
        let layout = self.layout();
        stamp::ensure_dir(layout.build_dir())?;

        let (flags, version) = timed(&mut report, Stage::Flags, || {
            let flags = self.flags.build_flags(config.mode)?;
            let version = match config.pch_header {
                Some(_) => Some(self.flags.compiler_version()?),
                None => None,
            };
            Ok((flags, version))
        })?;

        self.checkpoint()?;
        if let (Some(header), Some(version)) = (&config.pch_header, &version) {
            let artifact = PchArtifact::new(header, layout);
            let manager = PchManager::new(self.toolchain, self.cancel.clone());
            report.pch = Some(timed(&mut report, Stage::Pch, || {
                manager.ensure(&artifact, &flags, version, config.force)
            })?);
        }
        let pch = report.pch.as_ref().map(|p| p.artifact.clone());

        self.checkpoint()?;
        let library = timed(&mut report, Stage::LibraryCompile, || {
            self.compile_library(&flags, pch.as_deref())
        })?;
        let LibraryStage {
            units: library_units,
            source_count,
            compile,
        } = library;
        report.library = compile;

        self.checkpoint()?;
        if !report.library.fast_path {
            let objects: Vec<PathBuf> = library_units.iter().map(|u| u.object.clone()).collect();
            let recorded = LibraryMetadata::load(&layout.library_metadata()).into_option();
            let object_set_changed =
                !matches!(recorded, Some(m) if m.object_count == library_units.len());
            let force_merge =
                config.force || !report.library.compiled.is_empty() || object_set_changed;

            let archiver = LibraryArchiver::new(self.toolchain, layout, self.cancel.clone());
            let outcome = timed(&mut report, Stage::Archive, || {
                archiver.merge_and_archive(&objects, &layout.archive(), force_merge)
            })?;
            report.archive = Some(outcome);

            LibraryMetadata {
                flags_hash: flags.flags_hash(),
                build_mode: config.mode,
                source_count,
                object_count: library_units.len(),
            }
            .save(&layout.library_metadata())?;
        }

        self.checkpoint()?;
        let sketch_units = timed(&mut report, Stage::SketchCompile, || {
            self.compile_sketch(&flags, pch.as_deref())
        })?;
        let (sketch_units, sketch_report) = sketch_units;
        report.sketch = sketch_report;

        self.checkpoint()?;
        let force_link =
            config.force || report.archive_rebuilt() || !report.sketch.compiled.is_empty();
        let sketch_objects: Vec<PathBuf> = sketch_units.iter().map(|u| u.object.clone()).collect();
        let linker = FinalLinker::new(self.toolchain, layout, self.cancel.clone());
        let link = timed(&mut report, Stage::Link, || {
            linker.link(
                &sketch_objects,
                &layout.archive(),
                &layout.output_artifact(),
                &flags,
                force_link,
            )
        })?;
        report.link = Some(link);

        report.duration = start.elapsed();
        tracing::info!(
            compiled = report.compiled_count(),
            up_to_date = report.up_to_date_count(),
            total = report.total_units(),
            elapsed_ms = report.duration.as_millis(),
            "build finished"
        );
        Ok(report)
    }

    fn compile_library(&self, flags: &BuildFlags, pch: Option<&Path>) -> BuildResult<LibraryStage> {
        let config = self.config;
        let layout = self.layout();

        let sources = discover_sources(&config.library_dir)?;
        if sources.is_empty() {
            return Err(BuildError::missing(&config.library_dir, "library sources"));
        }
        let mut newest_input = newest_mtime(&config.library_dir);
        let units = if config.unity_chunks > 0 {
            let unity_dir = layout.unity_dir();
            let chunks = write_unity_chunks(&sources, config.unity_chunks, &unity_dir)?;
            newest_input = newest_input.max(newest_mtime(&unity_dir));
            units_for(&chunks, &unity_dir, &layout.obj_dir())
        } else {
            units_for(&sources, &config.library_dir, &layout.obj_dir())
        };

        let flags_hash = flags.flags_hash();
        let metadata_path = layout.library_metadata();
        let recorded = LibraryMetadata::load(&metadata_path).into_option();
        let archive = layout.archive();
        let merged_object = layout.merged_object();
        let fast = fast_path_applies(&FastPathInputs {
            metadata: recorded.as_ref(),
            flags_hash,
            source_count: sources.len(),
            units: &units,
            archive: &archive,
            merged_object: &merged_object,
            pch,
            newest_input,
            force: config.force,
        });
        if fast {
            tracing::info!(units = units.len(), "library up to date (fast path)");
            let compile = CompileReport::fast_path(&units);
            return Ok(LibraryStage {
                units,
                source_count: sources.len(),
                compile,
            });
        }

        invalidate_on_flag_change(&metadata_path, recorded.as_ref(), flags)?;
        let engine = DecisionEngine::new(flags_hash, recorded.as_ref())
            .with_pch(pch)
            .with_force(config.force);
        let compile = ParallelCompiler::new(self.toolchain, config.jobs, self.cancel.clone())
            .build(&units, &engine, flags, pch)?
            .into_result()?;
        Ok(LibraryStage {
            units,
            source_count: sources.len(),
            compile,
        })
    }

    fn compile_sketch(
        &self,
        flags: &BuildFlags,
        pch: Option<&Path>,
    ) -> BuildResult<(Vec<CompilationUnit>, CompileReport)> {
        let config = self.config;
        let layout = self.layout();

        let sources = discover_sources(&config.sketch_dir)?;
        if sources.is_empty() {
            return Err(BuildError::missing(&config.sketch_dir, "sketch sources"));
        }
        let units = units_for(&sources, &config.sketch_dir, &layout.sketch_dir());

        let metadata_path = layout.sketch_metadata();
        let recorded = LibraryMetadata::load(&metadata_path).into_option();
        invalidate_on_flag_change(&metadata_path, recorded.as_ref(), flags)?;
        let engine = DecisionEngine::new(flags.flags_hash(), recorded.as_ref())
            .with_pch(pch)
            .with_force(config.force);
        let compile = ParallelCompiler::new(self.toolchain, config.jobs, self.cancel.clone())
            .build(&units, &engine, flags, pch)?
            .into_result()?;

        LibraryMetadata {
            flags_hash: flags.flags_hash(),
            build_mode: config.mode,
            source_count: sources.len(),
            object_count: units.len(),
        }
        .save(&metadata_path)?;
        Ok((units, compile))
    }
}

struct LibraryStage {
    units: Vec<CompilationUnit>,
    source_count: usize,
    compile: CompileReport,
}

/// Drop a metadata record whose flags no longer match.
///
/// Objects compiled under the new flags in a run that then fails must not be
/// trusted later because the old record still names flags they match.
fn invalidate_on_flag_change(
    path: &Path,
    recorded: Option<&LibraryMetadata>,
    flags: &BuildFlags,
) -> BuildResult<()> {
    match recorded {
        Some(meta) if meta.flags_hash != flags.flags_hash() => stamp::remove_if_exists(path),
        _ => Ok(()),
    }
}

fn timed<T>(
    report: &mut BuildReport,
    stage: Stage,
    f: impl FnOnce() -> BuildResult<T>,
) -> BuildResult<T> {
    let start = Instant::now();
    tracing::debug!(%stage, "stage start");
    let result = f();
    report.timings.push(StageTiming {
        stage,
        duration: start.elapsed(),
    });
    result
}

/// Remove the whole build directory.
pub fn clean(layout: &BuildLayout) -> BuildResult<()> {
    let dir = layout.build_dir();
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            tracing::info!(dir = %dir.display(), "cleaned");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::io(dir, e)),
    }
}
