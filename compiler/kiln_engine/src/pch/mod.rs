//! Precompiled header lifecycle.
//!
//! A precompiled header is reused only when everything it was built from is
//! unchanged. Triggers, first match wins:
//!
//! 1. forced
//! 2. artifact missing
//! 3. no metadata record (corrupt counts as none)
//! 4. header content hash changed
//! 5. flags hash changed
//! 6. compiler version changed
//! 7. the depfile is at least as new as the artifact and lists a dependency
//!    that is missing or newer than the artifact
//!
//! Content hashing covers edits that keep the header's mtime; the depfile
//! check covers edits to headers the precompiled header includes.

use std::fmt;
use std::path::PathBuf;

use crate::cancel::CancelToken;
use crate::depfile::Depfile;
use crate::error::{BuildError, BuildResult};
use crate::flags::BuildFlags;
use crate::hash::hash_file;
use crate::layout::BuildLayout;
use crate::metadata::{AuxFile, MetadataFile, PchMetadata};
use crate::stamp;
use crate::toolchain::{Capability, HeaderJob, Toolchain};

/// Where one precompiled header and its bookkeeping live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PchArtifact {
    pub header: PathBuf,
    pub output: PathBuf,
    pub depfile: PathBuf,
    pub metadata: PathBuf,
}

impl PchArtifact {
    pub fn new(header: impl Into<PathBuf>, layout: &BuildLayout) -> Self {
        PchArtifact {
            header: header.into(),
            output: layout.pch_output(),
            depfile: layout.pch_depfile(),
            metadata: layout.pch_metadata(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PchRebuildReason {
    Forced,
    ArtifactMissing,
    NoMetadata,
    HeaderChanged,
    FlagsChanged,
    CompilerChanged { was: String, now: String },
    DependencyMissing(PathBuf),
    DependencyNewer(PathBuf),
    /// The depfile is newer than the artifact but cannot be parsed.
    MalformedDepfile,
}

impl fmt::Display for PchRebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PchRebuildReason::Forced => f.write_str("forced rebuild"),
            PchRebuildReason::ArtifactMissing => f.write_str("precompiled header missing"),
            PchRebuildReason::NoMetadata => f.write_str("no metadata from a previous build"),
            PchRebuildReason::HeaderChanged => f.write_str("header content changed"),
            PchRebuildReason::FlagsChanged => f.write_str("compiler flags changed"),
            PchRebuildReason::CompilerChanged { was, now } => {
                write!(f, "compiler changed from '{was}' to '{now}'")
            }
            PchRebuildReason::DependencyMissing(dep) => {
                write!(f, "dependency '{}' no longer exists", dep.display())
            }
            PchRebuildReason::DependencyNewer(dep) => {
                write!(f, "dependency '{}' is newer", dep.display())
            }
            PchRebuildReason::MalformedDepfile => f.write_str("depfile is unreadable"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PchOutcome {
    /// Why it was rebuilt; `None` when reused.
    pub reason: Option<PchRebuildReason>,
    pub artifact: PathBuf,
}

impl PchOutcome {
    pub fn rebuilt(&self) -> bool {
        self.reason.is_some()
    }
}

pub struct PchManager<'a> {
    toolchain: &'a dyn Toolchain,
    cancel: CancelToken,
}

impl<'a> PchManager<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, cancel: CancelToken) -> Self {
        PchManager { toolchain, cancel }
    }

    /// Why `artifact` must be rebuilt for the `current` inputs, if at all.
    pub fn check(
        &self,
        artifact: &PchArtifact,
        current: &PchMetadata,
        force: bool,
    ) -> Option<PchRebuildReason> {
        if force {
            return Some(PchRebuildReason::Forced);
        }
        let Some(output_time) = stamp::modified(&artifact.output) else {
            return Some(PchRebuildReason::ArtifactMissing);
        };
        let Some(recorded) = PchMetadata::load(&artifact.metadata).into_option() else {
            return Some(PchRebuildReason::NoMetadata);
        };
        if recorded.header_content_hash != current.header_content_hash {
            return Some(PchRebuildReason::HeaderChanged);
        }
        if recorded.flags_hash != current.flags_hash {
            return Some(PchRebuildReason::FlagsChanged);
        }
        if recorded.compiler_version != current.compiler_version {
            return Some(PchRebuildReason::CompilerChanged {
                was: recorded.compiler_version,
                now: current.compiler_version.clone(),
            });
        }

        // A depfile older than the artifact belongs to an earlier build.
        match stamp::modified(&artifact.depfile) {
            Some(depfile_time) if depfile_time >= output_time => {}
            _ => return None,
        }
        let depfile = match Depfile::read(&artifact.depfile) {
            AuxFile::Present(depfile) => depfile,
            AuxFile::Missing => return None,
            AuxFile::Malformed(_) => return Some(PchRebuildReason::MalformedDepfile),
        };
        for dep in &depfile.dependencies {
            match stamp::modified(dep) {
                None => return Some(PchRebuildReason::DependencyMissing(dep.clone())),
                Some(t) if t > output_time => {
                    return Some(PchRebuildReason::DependencyNewer(dep.clone()))
                }
                Some(_) => {}
            }
        }
        None
    }

    /// Make sure `artifact` is valid for `flags` and `compiler_version`,
    /// rebuilding it if any trigger fires.
    #[tracing::instrument(level = "info", skip_all, fields(header = %artifact.header.display()))]
    pub fn ensure(
        &self,
        artifact: &PchArtifact,
        flags: &BuildFlags,
        compiler_version: &str,
        force: bool,
    ) -> BuildResult<PchOutcome> {
        if !artifact.header.is_file() {
            return Err(BuildError::missing(&artifact.header, "precompiled header source"));
        }
        let current = PchMetadata {
            header_content_hash: hash_file(&artifact.header)?,
            flags_hash: flags.flags_hash(),
            compiler_version: compiler_version.to_string(),
        };

        let Some(reason) = self.check(artifact, &current, force) else {
            tracing::debug!("precompiled header up to date");
            return Ok(PchOutcome {
                reason: None,
                artifact: artifact.output.clone(),
            });
        };

        tracing::info!(%reason, "rebuilding precompiled header");
        self.compile(artifact, flags)?;
        current.save(&artifact.metadata)?;

        Ok(PchOutcome {
            reason: Some(reason),
            artifact: artifact.output.clone(),
        })
    }

    fn compile(&self, artifact: &PchArtifact, flags: &BuildFlags) -> BuildResult<()> {
        if let Some(dir) = artifact.output.parent() {
            stamp::ensure_dir(dir)?;
        }
        let staged = stamp::staging_path(&artifact.output);
        stamp::remove_if_exists(&staged)?;

        let subject = artifact.header.display().to_string();
        let args = flags.compile_args();
        let job = HeaderJob {
            header: &artifact.header,
            output: &staged,
            depfile: &artifact.depfile,
            flags: &args,
        };
        let result = self
            .toolchain
            .compile_header(&job, &self.cancel)
            .and_then(|out| out.check(Capability::CompileHeader, &subject))
            .and_then(|_| {
                stamp::promote_staged(Capability::CompileHeader, &subject, &staged, &artifact.output)
            });
        if result.is_err() {
            let _ = stamp::remove_if_exists(&staged);
        }
        result
    }
}
