//! Parallel compilation of translation units.
//!
//! Units are partitioned by the [`DecisionEngine`]; stale units are compiled
//! as independent jobs on a bounded rayon pool. Each job yields exactly one
//! result and the pool's ordered `collect` assembles the report. A failed job
//! never cancels its siblings: every submitted job is drained so one broken
//! source does not hide errors in others.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::cancel::CancelToken;
use crate::error::{BuildError, BuildResult, UnitFailure};
use crate::flags::BuildFlags;
use crate::hash::ContentHash;
use crate::metadata::LibraryMetadata;
use crate::rebuild::{Decision, DecisionEngine};
use crate::stamp;
use crate::toolchain::{Capability, Toolchain, UnitJob};
use crate::units::CompilationUnit;

/// Outcome of compiling one set of units.
#[derive(Debug, Default)]
pub struct CompileReport {
    pub compiled: Vec<CompilationUnit>,
    pub up_to_date: Vec<CompilationUnit>,
    pub failed: Vec<UnitFailure>,
    /// Jobs that were interrupted or never started because of cancellation.
    pub cancelled: Vec<CompilationUnit>,
    /// Whether the per-unit checks were skipped entirely.
    pub fast_path: bool,
    pub duration: Duration,
}

impl CompileReport {
    /// All units reported up to date without being examined.
    pub fn fast_path(units: &[CompilationUnit]) -> Self {
        CompileReport {
            up_to_date: units.to_vec(),
            fast_path: true,
            ..CompileReport::default()
        }
    }

    pub fn total(&self) -> usize {
        self.compiled.len() + self.up_to_date.len() + self.failed.len() + self.cancelled.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    /// Turn an unsuccessful report into an error.
    ///
    /// Cancellation wins over unit failures: an interrupted run is reported
    /// as interrupted.
    pub fn into_result(self) -> BuildResult<Self> {
        if !self.cancelled.is_empty() {
            return Err(BuildError::Cancelled);
        }
        if !self.failed.is_empty() {
            return Err(BuildError::CompileFailed {
                failures: self.failed,
            });
        }
        Ok(self)
    }
}

/// What the fast-path check looks at.
#[derive(Clone, Copy, Debug)]
pub struct FastPathInputs<'a> {
    pub metadata: Option<&'a LibraryMetadata>,
    pub flags_hash: ContentHash,
    /// Number of sources discovered this run.
    pub source_count: usize,
    pub units: &'a [CompilationUnit],
    pub archive: &'a Path,
    /// The object the thin archive references.
    pub merged_object: &'a Path,
    pub pch: Option<&'a Path>,
    /// Newest mtime of any file in the source tree.
    pub newest_input: Option<SystemTime>,
    pub force: bool,
}

/// Whether the library stage can be declared up to date without checking
/// any unit.
///
/// Requires matching flags hash and counts from the last successful build, an
/// existing archive that is not older than the precompiled header or any
/// file in the source tree, the merged object the thin archive references
/// still present and not newer than the archive, and every unit object still
/// in place.
///
/// `newest_input` only covers the library tree. A header outside it that
/// reaches a unit through its depfile, but not through the precompiled
/// header, can change without this check noticing; that edit is picked up
/// once anything else defeats the fast path.
pub fn fast_path_applies(inputs: &FastPathInputs<'_>) -> bool {
    if inputs.force {
        return false;
    }
    let Some(meta) = inputs.metadata else {
        return false;
    };
    if meta.flags_hash != inputs.flags_hash
        || meta.source_count != inputs.source_count
        || meta.object_count != inputs.units.len()
    {
        return false;
    }
    let Some(archive_time) = stamp::modified(inputs.archive) else {
        return false;
    };
    if inputs.pch.is_some_and(|pch| stamp::newer_than(pch, archive_time)) {
        return false;
    }
    if inputs.newest_input.is_some_and(|t| t > archive_time) {
        return false;
    }
    match stamp::modified(inputs.merged_object) {
        Some(merged_time) if merged_time <= archive_time => {}
        _ => return false,
    }
    inputs.units.iter().all(|u| u.object.exists())
}

pub struct ParallelCompiler<'a> {
    toolchain: &'a dyn Toolchain,
    jobs: usize,
    cancel: CancelToken,
}

impl<'a> ParallelCompiler<'a> {
    /// `jobs == 0` means host parallelism.
    pub fn new(toolchain: &'a dyn Toolchain, jobs: usize, cancel: CancelToken) -> Self {
        ParallelCompiler {
            toolchain,
            jobs,
            cancel,
        }
    }

    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        } else {
            self.jobs
        }
    }

    /// Compile every unit the `engine` says is stale.
    #[tracing::instrument(level = "info", skip_all, fields(units = units.len()))]
    pub fn build(
        &self,
        units: &[CompilationUnit],
        engine: &DecisionEngine,
        flags: &BuildFlags,
        pch: Option<&Path>,
    ) -> BuildResult<CompileReport> {
        let start = Instant::now();
        let mut report = CompileReport::default();

        let mut stale = Vec::new();
        for unit in units {
            match engine.decide(unit) {
                Decision::Rebuild(reason) => {
                    tracing::debug!(unit = %unit.name(), %reason, "rebuild");
                    stale.push(unit);
                }
                Decision::UpToDate => {
                    tracing::debug!(unit = %unit.name(), "up to date");
                    report.up_to_date.push(unit.clone());
                }
            }
        }

        if !stale.is_empty() {
            self.prepare_dirs(&stale)?;
            let args = flags.compile_args();
            let jobs = self.effective_jobs().min(stale.len());
            tracing::info!(stale = stale.len(), jobs, "compiling");

            let results = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .thread_name(|i| format!("kiln-compile-{i}"))
                .build_scoped(rayon::ThreadBuilder::run, |pool| {
                    pool.install(|| {
                        stale
                            .par_iter()
                            .map(|unit| (*unit, self.compile_one(unit, &args, pch)))
                            .collect::<Vec<_>>()
                    })
                })
                .unwrap_or_else(|e| {
                    tracing::warn!("failed to create compile pool ({e}), compiling sequentially");
                    stale
                        .iter()
                        .map(|unit| (*unit, self.compile_one(unit, &args, pch)))
                        .collect()
                });

            for (unit, result) in results {
                match result {
                    Ok(()) => report.compiled.push(unit.clone()),
                    Err(BuildError::Cancelled) => report.cancelled.push(unit.clone()),
                    Err(error) => {
                        tracing::debug!(unit = %unit.name(), %error, "compile failed");
                        report.failed.push(UnitFailure {
                            unit: unit.clone(),
                            error,
                        });
                    }
                }
            }
        }

        report.duration = start.elapsed();
        tracing::info!(
            compiled = report.compiled.len(),
            up_to_date = report.up_to_date.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            "compile finished"
        );
        Ok(report)
    }

    fn prepare_dirs(&self, units: &[&CompilationUnit]) -> BuildResult<()> {
        let dirs: FxHashSet<&Path> = units
            .iter()
            .flat_map(|u| [u.object.parent(), u.depfile.parent()])
            .flatten()
            .collect();
        dirs.into_iter().try_for_each(stamp::ensure_dir)
    }

    /// One job: compile to a staging path, then rename over the object.
    fn compile_one(
        &self,
        unit: &CompilationUnit,
        args: &[String],
        pch: Option<&Path>,
    ) -> BuildResult<()> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        let staged = stamp::staging_path(&unit.object);
        let subject = unit.source.display().to_string();
        let job = UnitJob {
            source: &unit.source,
            object: &staged,
            depfile: &unit.depfile,
            flags: args,
            pch,
        };
        let result = self
            .toolchain
            .compile_unit(&job, &self.cancel)
            .and_then(|out| out.check(Capability::CompileUnit, &subject))
            .and_then(|_| {
                stamp::promote_staged(Capability::CompileUnit, &subject, &staged, &unit.object)
            });
        if result.is_err() {
            let _ = stamp::remove_if_exists(&staged);
        }
        result
    }
}
