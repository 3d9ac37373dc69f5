//! Emscripten driver (`em++` and `emar`).
//!
//! Command shapes:
//!
//! ```text
//! header:       em++ -x c++-header <header> -o <pch> -MD -MF <depfile> <flags>
//! unit:         em++ -c <source> -o <object> -MD -MF <depfile> [-include-pch <pch>] <flags>
//! partial link: em++ -r @<rsp> -o <merged.o>
//! archive:      emar rcs --thin <archive> <members>
//! link:         em++ <objects> <archives> -o <out.js> <link flags>
//! ```
//!
//! Linking to `<name>.js` makes `em++` write the `<name>.wasm` payload next
//! to it.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cancel::CancelToken;
use crate::error::BuildResult;

use super::process::run_command;
use super::{Capability, HeaderJob, LinkJob, ToolOutput, Toolchain, UnitJob};

#[derive(Clone, Debug)]
pub struct EmscriptenToolchain {
    compiler: PathBuf,
    archiver: PathBuf,
}

impl Default for EmscriptenToolchain {
    fn default() -> Self {
        Self::new()
    }
}

impl EmscriptenToolchain {
    /// Use `em++` and `emar` from `PATH`.
    pub fn new() -> Self {
        EmscriptenToolchain {
            compiler: PathBuf::from("em++"),
            archiver: PathBuf::from("emar"),
        }
    }

    #[must_use]
    pub fn with_compiler(mut self, compiler: impl Into<PathBuf>) -> Self {
        self.compiler = compiler.into();
        self
    }

    #[must_use]
    pub fn with_archiver(mut self, archiver: impl Into<PathBuf>) -> Self {
        self.archiver = archiver.into();
        self
    }

    fn header_command(&self, job: &HeaderJob<'_>) -> Command {
        let mut cmd = Command::new(&self.compiler);
        cmd.arg("-x")
            .arg("c++-header")
            .arg(job.header)
            .arg("-o")
            .arg(job.output)
            .arg("-MD")
            .arg("-MF")
            .arg(job.depfile)
            .args(job.flags);
        cmd
    }

    fn unit_command(&self, job: &UnitJob<'_>) -> Command {
        let mut cmd = Command::new(&self.compiler);
        cmd.arg("-c")
            .arg(job.source)
            .arg("-o")
            .arg(job.object)
            .arg("-MD")
            .arg("-MF")
            .arg(job.depfile);
        if let Some(pch) = job.pch {
            cmd.arg("-include-pch").arg(pch);
        }
        cmd.args(job.flags);
        cmd
    }

    fn partial_link_command(&self, response_file: &Path, output: &Path) -> Command {
        let mut rsp = std::ffi::OsString::from("@");
        rsp.push(response_file);
        let mut cmd = Command::new(&self.compiler);
        cmd.arg("-r").arg(rsp).arg("-o").arg(output);
        cmd
    }

    fn archive_command(&self, members: &[PathBuf], archive: &Path) -> Command {
        let mut cmd = Command::new(&self.archiver);
        cmd.arg("rcs").arg("--thin").arg(archive).args(members);
        cmd
    }

    fn link_command(&self, job: &LinkJob<'_>) -> Command {
        let mut cmd = Command::new(&self.compiler);
        cmd.args(job.objects)
            .args(job.archives)
            .arg("-o")
            .arg(job.output)
            .args(job.link_flags);
        cmd
    }
}

impl Toolchain for EmscriptenToolchain {
    fn version(&self) -> BuildResult<String> {
        let mut cmd = Command::new(&self.compiler);
        cmd.arg("--version");
        let output = run_command(cmd, &CancelToken::new())?
            .check(Capability::Version, &self.compiler.display().to_string())?;
        Ok(first_line(&output.stdout))
    }

    fn compile_header(&self, job: &HeaderJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput> {
        run_command(self.header_command(job), cancel)
    }

    fn compile_unit(&self, job: &UnitJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput> {
        run_command(self.unit_command(job), cancel)
    }

    fn partial_link(
        &self,
        response_file: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> BuildResult<ToolOutput> {
        run_command(self.partial_link_command(response_file, output), cancel)
    }

    fn archive(
        &self,
        members: &[PathBuf],
        archive: &Path,
        cancel: &CancelToken,
    ) -> BuildResult<ToolOutput> {
        run_command(self.archive_command(members, archive), cancel)
    }

    fn link(&self, job: &LinkJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput> {
        run_command(self.link_command(job), cancel)
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}
