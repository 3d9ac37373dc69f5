//! Final link into the `.js` + `.wasm` artifact pair.
//!
//! The linker keeps its own freshness check: both outputs must exist, be
//! newer than every input, and have been linked with the current link flags.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{BuildError, BuildResult};
use crate::flags::BuildFlags;
use crate::layout::BuildLayout;
use crate::metadata::{LinkMetadata, MetadataFile};
use crate::stamp;
use crate::toolchain::{Capability, LinkJob, Toolchain};

/// The `.wasm` payload written next to a `.js` artifact.
pub fn wasm_companion(output: &Path) -> PathBuf {
    output.with_extension("wasm")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkReason {
    Forced,
    OutputMissing(PathBuf),
    InputNewer(PathBuf),
    NoMetadata,
    LinkFlagsChanged,
}

impl fmt::Display for LinkReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkReason::Forced => f.write_str("forced"),
            LinkReason::OutputMissing(path) => write!(f, "'{}' missing", path.display()),
            LinkReason::InputNewer(path) => write!(f, "'{}' is newer", path.display()),
            LinkReason::NoMetadata => f.write_str("no link metadata"),
            LinkReason::LinkFlagsChanged => f.write_str("link flags changed"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Why the link ran; `None` when skipped.
    pub reason: Option<LinkReason>,
    pub output: PathBuf,
    pub wasm: PathBuf,
}

impl LinkOutcome {
    pub fn linked(&self) -> bool {
        self.reason.is_some()
    }
}

pub struct FinalLinker<'a> {
    toolchain: &'a dyn Toolchain,
    /// The object the thin archive references instead of embedding.
    merged_object: PathBuf,
    metadata: PathBuf,
    cancel: CancelToken,
}

impl<'a> FinalLinker<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, layout: &BuildLayout, cancel: CancelToken) -> Self {
        FinalLinker {
            toolchain,
            merged_object: layout.merged_object(),
            metadata: layout.link_metadata(),
            cancel,
        }
    }

    /// Link `sketch_objects` against `archive` into `output`.
    ///
    /// The archive is thin, so the merged object it references is an input
    /// too: it must exist, and a newer one forces a relink.
    #[tracing::instrument(level = "info", skip_all, fields(output = %output.display()))]
    pub fn link(
        &self,
        sketch_objects: &[PathBuf],
        archive: &Path,
        output: &Path,
        flags: &BuildFlags,
        force: bool,
    ) -> BuildResult<LinkOutcome> {
        if !archive.exists() {
            return Err(BuildError::missing(archive, "library archive"));
        }
        if !self.merged_object.exists() {
            return Err(BuildError::missing(&self.merged_object, "thin archive member"));
        }
        if let Some(missing) = sketch_objects.iter().find(|o| !o.exists()) {
            return Err(BuildError::missing(missing, "sketch object"));
        }

        let wasm = wasm_companion(output);
        let inputs: Vec<&Path> = sketch_objects
            .iter()
            .map(PathBuf::as_path)
            .chain([archive, self.merged_object.as_path()])
            .collect();
        let Some(reason) = self.link_reason(&inputs, output, &wasm, flags, force) else {
            tracing::debug!("artifact up to date");
            return Ok(LinkOutcome {
                reason: None,
                output: output.to_path_buf(),
                wasm,
            });
        };

        tracing::info!(%reason, "linking");
        if let Some(dir) = output.parent() {
            stamp::ensure_dir(dir)?;
        }
        // A failed link must not leave a previous artifact behind.
        stamp::remove_if_exists(output)?;
        stamp::remove_if_exists(&wasm)?;

        let subject = output.display().to_string();
        let job = LinkJob {
            objects: sketch_objects,
            archives: &[archive.to_path_buf()],
            output,
            link_flags: &flags.link_flags,
        };
        self.toolchain
            .link(&job, &self.cancel)?
            .check(Capability::Link, &subject)?;
        for produced in [output, wasm.as_path()] {
            if !produced.exists() {
                return Err(BuildError::contract(Capability::Link, subject.as_str(), produced));
            }
        }

        LinkMetadata {
            link_flags_hash: flags.link_flags_hash(),
        }
        .save(&self.metadata)?;

        Ok(LinkOutcome {
            reason: Some(reason),
            output: output.to_path_buf(),
            wasm,
        })
    }

    fn link_reason(
        &self,
        inputs: &[&Path],
        output: &Path,
        wasm: &Path,
        flags: &BuildFlags,
        force: bool,
    ) -> Option<LinkReason> {
        if force {
            return Some(LinkReason::Forced);
        }
        let Some(output_time) = stamp::modified(output) else {
            return Some(LinkReason::OutputMissing(output.to_path_buf()));
        };
        let Some(wasm_time) = stamp::modified(wasm) else {
            return Some(LinkReason::OutputMissing(wasm.to_path_buf()));
        };
        let oldest_output = output_time.min(wasm_time);
        if let Some(newer) = inputs.iter().find(|i| stamp::newer_than(i, oldest_output)) {
            return Some(LinkReason::InputNewer(newer.to_path_buf()));
        }
        match LinkMetadata::load(&self.metadata).into_option() {
            None => Some(LinkReason::NoMetadata),
            Some(meta) if meta.link_flags_hash != flags.link_flags_hash() => {
                Some(LinkReason::LinkFlagsChanged)
            }
            Some(_) => None,
        }
    }
}
