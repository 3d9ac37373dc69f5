//! Partial link and thin archive.
//!
//! All library objects are merged into one relocatable object (`-r`), which
//! is then wrapped in a thin archive. The archive only references the merged
//! object, so the merged object must stay where it is for as long as the
//! archive is used.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{BuildError, BuildResult};
use crate::layout::BuildLayout;
use crate::stamp;
use crate::toolchain::response::write_response_file;
use crate::toolchain::{Capability, Toolchain};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeReason {
    Forced,
    MergedMissing,
    ObjectNewer(PathBuf),
}

impl fmt::Display for MergeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeReason::Forced => f.write_str("forced"),
            MergeReason::MergedMissing => f.write_str("merged object missing"),
            MergeReason::ObjectNewer(obj) => write!(f, "'{}' is newer", obj.display()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    /// Why the partial link ran; `None` when the merged object was reused.
    pub merged: Option<MergeReason>,
    pub archived: bool,
}

impl ArchiveOutcome {
    pub fn rebuilt(&self) -> bool {
        self.merged.is_some() || self.archived
    }
}

pub struct LibraryArchiver<'a> {
    toolchain: &'a dyn Toolchain,
    merged_object: PathBuf,
    response_file: PathBuf,
    cancel: CancelToken,
}

impl<'a> LibraryArchiver<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, layout: &BuildLayout, cancel: CancelToken) -> Self {
        LibraryArchiver {
            toolchain,
            merged_object: layout.merged_object(),
            response_file: layout.response_file(),
            cancel,
        }
    }

    pub fn merged_object(&self) -> &Path {
        &self.merged_object
    }

    /// Merge `objects` and archive the result into `archive`.
    #[tracing::instrument(level = "info", skip_all, fields(objects = objects.len()))]
    pub fn merge_and_archive(
        &self,
        objects: &[PathBuf],
        archive: &Path,
        force: bool,
    ) -> BuildResult<ArchiveOutcome> {
        if let Some(missing) = objects.iter().find(|o| !o.exists()) {
            return Err(BuildError::missing(missing, "object file"));
        }

        let mut outcome = ArchiveOutcome {
            merged: self.merge_reason(objects, force),
            archived: false,
        };
        if let Some(reason) = &outcome.merged {
            tracing::info!(%reason, "partial link");
            self.partial_link(objects)?;
        } else {
            tracing::debug!("merged object up to date");
        }

        let archive_stale = match stamp::modified(archive) {
            None => true,
            Some(archive_time) => stamp::newer_than(&self.merged_object, archive_time),
        };
        if outcome.merged.is_some() || archive_stale {
            tracing::info!(archive = %archive.display(), "archiving");
            self.archive(archive)?;
            outcome.archived = true;
        } else {
            tracing::debug!("archive up to date");
        }
        Ok(outcome)
    }

    fn merge_reason(&self, objects: &[PathBuf], force: bool) -> Option<MergeReason> {
        if force {
            return Some(MergeReason::Forced);
        }
        let Some(merged_time) = stamp::modified(&self.merged_object) else {
            return Some(MergeReason::MergedMissing);
        };
        objects
            .iter()
            .find(|o| stamp::newer_than(o, merged_time))
            .map(|o| MergeReason::ObjectNewer(o.clone()))
    }

    fn partial_link(&self, objects: &[PathBuf]) -> BuildResult<()> {
        write_response_file(&self.response_file, objects)?;
        let staged = stamp::staging_path(&self.merged_object);
        stamp::remove_if_exists(&staged)?;

        let subject = self.merged_object.display().to_string();
        let result = self
            .toolchain
            .partial_link(&self.response_file, &staged, &self.cancel)
            .and_then(|out| out.check(Capability::PartialLink, &subject))
            .and_then(|_| {
                stamp::promote_staged(Capability::PartialLink, &subject, &staged, &self.merged_object)
            });
        if result.is_err() {
            let _ = stamp::remove_if_exists(&staged);
        }
        result
    }

    fn archive(&self, archive: &Path) -> BuildResult<()> {
        if let Some(dir) = archive.parent() {
            stamp::ensure_dir(dir)?;
        }
        // Never append to a previous archive's member list.
        let staged = stamp::staging_path(archive);
        stamp::remove_if_exists(&staged)?;

        let subject = archive.display().to_string();
        let members = [self.merged_object.clone()];
        let result = self
            .toolchain
            .archive(&members, &staged, &self.cancel)
            .and_then(|out| out.check(Capability::Archive, &subject))
            .and_then(|_| stamp::promote_staged(Capability::Archive, &subject, &staged, archive));
        if result.is_err() {
            let _ = stamp::remove_if_exists(&staged);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeToolchain;
    use pretty_assertions::assert_eq;
    use std::fs;

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: BuildLayout,
        objects: Vec<PathBuf>,
        fake: FakeToolchain,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = BuildLayout::new(dir.path().join("build"));
            fs::create_dir_all(layout.obj_dir()).unwrap();
            let fake = FakeToolchain::new();
            let objects: Vec<PathBuf> = ["a.cpp.o", "b.cpp.o"]
                .iter()
                .map(|n| {
                    let path = layout.obj_dir().join(n);
                    fake.touch(&path).unwrap();
                    path
                })
                .collect();
            Fixture {
                _dir: dir,
                layout,
                objects,
                fake,
            }
        }

        fn run(&self, force: bool) -> BuildResult<ArchiveOutcome> {
            LibraryArchiver::new(&self.fake, &self.layout, CancelToken::new())
                .merge_and_archive(&self.objects, &self.layout.archive(), force)
        }
    }

    #[test]
    fn test_first_run_merges_and_archives() {
        let fx = Fixture::new();
        let outcome = fx.run(false).unwrap();
        assert_eq!(outcome.merged, Some(MergeReason::MergedMissing));
        assert!(outcome.archived);
        assert!(fx.layout.merged_object().exists());
        assert!(fx.layout.archive().exists());

        let rsp = fs::read_to_string(fx.layout.response_file()).unwrap();
        assert_eq!(rsp.lines().count(), 2);
    }

    #[test]
    fn test_second_run_does_nothing() {
        let fx = Fixture::new();
        fx.run(false).unwrap();
        fx.fake.reset_invocations();

        let outcome = fx.run(false).unwrap();
        assert_eq!(outcome, ArchiveOutcome::default());
        assert!(!outcome.rebuilt());
        assert!(fx.fake.invocations().is_empty());
    }

    #[test]
    fn test_newer_object_relinks_and_rearchives() {
        let fx = Fixture::new();
        fx.run(false).unwrap();
        fx.fake.touch(&fx.objects[1]).unwrap();

        let outcome = fx.run(false).unwrap();
        assert_eq!(outcome.merged, Some(MergeReason::ObjectNewer(fx.objects[1].clone())));
        assert!(outcome.archived);
    }

    #[test]
    fn test_forced() {
        let fx = Fixture::new();
        fx.run(false).unwrap();
        let outcome = fx.run(true).unwrap();
        assert_eq!(outcome.merged, Some(MergeReason::Forced));
        assert!(outcome.archived);
    }

    #[test]
    fn test_missing_archive_only_rearchives() {
        let fx = Fixture::new();
        fx.run(false).unwrap();
        fs::remove_file(fx.layout.archive()).unwrap();

        let outcome = fx.run(false).unwrap();
        assert_eq!(outcome.merged, None);
        assert!(outcome.archived);
        assert_eq!(fx.fake.count(Capability::PartialLink), 1);
    }

    #[test]
    fn test_archive_older_than_merged_rearchives() {
        let fx = Fixture::new();
        fx.run(false).unwrap();
        fx.fake.touch(&fx.layout.merged_object()).unwrap();

        let outcome = fx.run(false).unwrap();
        assert_eq!(outcome.merged, None);
        assert!(outcome.archived);
    }

    #[test]
    fn test_missing_object_is_missing_input() {
        let fx = Fixture::new();
        fs::remove_file(&fx.objects[0]).unwrap();
        let err = fx.run(false).unwrap_err();
        assert!(matches!(err, BuildError::MissingInput { .. }));
    }

    #[test]
    fn test_partial_link_contract_violation() {
        let fx = Fixture::new();
        fx.fake.omit_output(Capability::PartialLink);
        let err = fx.run(false).unwrap_err();
        assert!(matches!(
            err,
            BuildError::ToolContract {
                capability: Capability::PartialLink,
                ..
            }
        ));
        assert!(!fx.layout.archive().exists());
    }

    #[test]
    fn test_archive_contract_violation() {
        let fx = Fixture::new();
        fx.fake.omit_output(Capability::Archive);
        let err = fx.run(false).unwrap_err();
        assert!(matches!(
            err,
            BuildError::ToolContract {
                capability: Capability::Archive,
                ..
            }
        ));
    }
}
