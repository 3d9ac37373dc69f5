//! Per-unit rebuild decisions.
//!
//! Checks run in a fixed order and the first that fires decides:
//!
//! 1. forced
//! 2. object missing
//! 3. flags hash differs from the recorded one (no record counts as differing)
//! 4. precompiled header newer than the object
//! 5. source missing or newer than the object
//! 6. any existing dependency from the unit's depfile newer than the object
//!
//! Otherwise the object is up to date. A missing or unparsable depfile only
//! means there is no dependency information; the other checks still apply.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::depfile::Depfile;
use crate::hash::ContentHash;
use crate::metadata::{AuxFile, LibraryMetadata};
use crate::stamp;
use crate::units::CompilationUnit;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebuildReason {
    Forced,
    ObjectMissing,
    /// No usable metadata record from a previous build.
    NoMetadata,
    FlagsChanged,
    PchNewer,
    SourceMissing,
    SourceNewer,
    DependencyNewer(PathBuf),
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::Forced => f.write_str("forced rebuild"),
            RebuildReason::ObjectMissing => f.write_str("object file missing"),
            RebuildReason::NoMetadata => f.write_str("no build metadata"),
            RebuildReason::FlagsChanged => f.write_str("compiler flags changed"),
            RebuildReason::PchNewer => f.write_str("precompiled header is newer"),
            RebuildReason::SourceMissing => f.write_str("source file missing"),
            RebuildReason::SourceNewer => f.write_str("source is newer"),
            RebuildReason::DependencyNewer(dep) => {
                write!(f, "dependency '{}' is newer", dep.display())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Rebuild(RebuildReason),
    UpToDate,
}

impl Decision {
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, Decision::Rebuild(_))
    }
}

/// Decides rebuilds for the units of one stage.
///
/// Built once per stage with the current flags hash and the stage's persisted
/// metadata, then queried per unit from any worker.
#[derive(Clone, Debug)]
pub struct DecisionEngine {
    flags_hash: ContentHash,
    recorded_flags: Option<ContentHash>,
    pch_modified: Option<SystemTime>,
    force: bool,
}

impl DecisionEngine {
    pub fn new(flags_hash: ContentHash, metadata: Option<&LibraryMetadata>) -> Self {
        DecisionEngine {
            flags_hash,
            recorded_flags: metadata.map(|m| m.flags_hash),
            pch_modified: None,
            force: false,
        }
    }

    /// Objects older than `pch` are stale.
    #[must_use]
    pub fn with_pch(mut self, pch: Option<&Path>) -> Self {
        self.pch_modified = pch.and_then(stamp::modified);
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn decide(&self, unit: &CompilationUnit) -> Decision {
        match self.stale_reason(unit) {
            Some(reason) => Decision::Rebuild(reason),
            None => Decision::UpToDate,
        }
    }

    fn stale_reason(&self, unit: &CompilationUnit) -> Option<RebuildReason> {
        if self.force {
            return Some(RebuildReason::Forced);
        }
        let Some(object_time) = stamp::modified(&unit.object) else {
            return Some(RebuildReason::ObjectMissing);
        };
        match self.recorded_flags {
            None => return Some(RebuildReason::NoMetadata),
            Some(recorded) if recorded != self.flags_hash => {
                return Some(RebuildReason::FlagsChanged)
            }
            Some(_) => {}
        }
        if self.pch_modified.is_some_and(|pch| pch > object_time) {
            return Some(RebuildReason::PchNewer);
        }
        match stamp::modified(&unit.source) {
            None => return Some(RebuildReason::SourceMissing),
            Some(source_time) if source_time > object_time => {
                return Some(RebuildReason::SourceNewer)
            }
            Some(_) => {}
        }

        let depfile = match Depfile::read(&unit.depfile) {
            AuxFile::Present(depfile) => depfile,
            AuxFile::Missing => {
                tracing::debug!(unit = %unit.name(), "no depfile, skipping dependency check");
                return None;
            }
            AuxFile::Malformed(_) => return None,
        };
        let newer = depfile
            .existing_dependencies()
            .find(|dep| stamp::newer_than(dep, object_time))
            .map(|dep| RebuildReason::DependencyNewer(dep.to_path_buf()));
        newer
    }
}
