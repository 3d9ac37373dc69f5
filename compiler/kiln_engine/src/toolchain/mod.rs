//! External compiler toolchain.
//!
//! The engine never builds a command line itself; it asks a [`Toolchain`]
//! for one of five capabilities. Each call blocks until the tool exits and
//! returns its captured output. An `Err` means the tool could not be run at
//! all (or was interrupted); a tool that ran and failed is an `Ok` with
//! `success == false`, which callers turn into an error with
//! [`ToolOutput::check`].

mod emscripten;
pub mod process;
pub mod response;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{BuildError, BuildResult};

pub use emscripten::EmscriptenToolchain;

/// What a toolchain invocation was for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `--version` query used to identify the compiler.
    Version,
    CompileHeader,
    CompileUnit,
    PartialLink,
    Archive,
    Link,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Version => "version query",
            Capability::CompileHeader => "header compilation",
            Capability::CompileUnit => "compilation",
            Capability::PartialLink => "partial link",
            Capability::Archive => "archive",
            Capability::Link => "link",
        })
    }
}

/// Captured result of one tool run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The rendered command line, for error reports.
    pub command: String,
}

impl ToolOutput {
    /// A successful run with no output.
    pub fn succeeded(command: impl Into<String>) -> Self {
        ToolOutput {
            success: true,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            command: command.into(),
        }
    }

    /// Combined diagnostics: stderr, then stdout if it carried anything.
    pub fn diagnostics(&self) -> String {
        let stderr = self.stderr.trim_end();
        let stdout = self.stdout.trim_end();
        match (stderr.is_empty(), stdout.is_empty()) {
            (_, true) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (false, false) => format!("{stderr}\n{stdout}"),
        }
    }

    /// Turn an unsuccessful run into a [`BuildError::ToolInvocation`].
    pub fn check(self, capability: Capability, subject: &str) -> BuildResult<Self> {
        if self.success {
            return Ok(self);
        }
        Err(BuildError::ToolInvocation {
            capability,
            subject: subject.to_string(),
            exit_code: self.exit_code,
            diagnostics: self.diagnostics(),
            command: self.command,
        })
    }
}

/// Precompile a header, writing `output` and a fresh `depfile`.
#[derive(Clone, Copy, Debug)]
pub struct HeaderJob<'a> {
    pub header: &'a Path,
    pub output: &'a Path,
    pub depfile: &'a Path,
    pub flags: &'a [String],
}

/// Compile one translation unit, writing `object` and `depfile`.
#[derive(Clone, Copy, Debug)]
pub struct UnitJob<'a> {
    pub source: &'a Path,
    pub object: &'a Path,
    pub depfile: &'a Path,
    pub flags: &'a [String],
    pub pch: Option<&'a Path>,
}

/// Link objects and archives into `output` and its `.wasm` companion.
#[derive(Clone, Copy, Debug)]
pub struct LinkJob<'a> {
    pub objects: &'a [PathBuf],
    pub archives: &'a [PathBuf],
    pub output: &'a Path,
    pub link_flags: &'a [String],
}

/// A compiler toolchain driver.
///
/// Implementations must be shareable across the compile worker pool.
pub trait Toolchain: Send + Sync {
    fn version(&self) -> BuildResult<String>;

    fn compile_header(&self, job: &HeaderJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput>;

    fn compile_unit(&self, job: &UnitJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput>;

    /// Merge the objects listed in `response_file` into one relocatable object.
    fn partial_link(
        &self,
        response_file: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> BuildResult<ToolOutput>;

    /// Create, replace and index a thin archive referencing `members`.
    fn archive(
        &self,
        members: &[PathBuf],
        archive: &Path,
        cancel: &CancelToken,
    ) -> BuildResult<ToolOutput>;

    fn link(&self, job: &LinkJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput>;
}
