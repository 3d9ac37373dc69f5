//! Build engine error types.
//!
//! Expected "not there" conditions (no metadata yet, no depfile yet) are not
//! errors; they are reported as values by the loaders. Everything here is
//! either fatal for a stage or fatal for a single compilation unit.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::toolchain::Capability;
use crate::units::CompilationUnit;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The tool ran and exited unsuccessfully.
    #[error("{capability} failed for '{subject}'{}\n{diagnostics}\ncommand: {command}", exit_suffix(.exit_code))]
    ToolInvocation {
        capability: Capability,
        subject: String,
        exit_code: Option<i32>,
        diagnostics: String,
        command: String,
    },

    /// The tool reported success but the output it promised is absent.
    #[error("{capability} reported success for '{subject}' but '{}' was not produced", .expected.display())]
    ToolContract {
        capability: Capability,
        subject: String,
        expected: PathBuf,
    },

    /// A required upstream artifact or input does not exist.
    #[error("missing {what}: '{}'", .path.display())]
    MissingInput { path: PathBuf, what: &'static str },

    /// The tool executable could not be started at all.
    #[error("could not run '{program}': {message}")]
    ToolUnavailable { program: String, message: String },

    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid flags file '{}': {message}", .path.display())]
    InvalidFlagsFile { path: PathBuf, message: String },

    #[error("build interrupted")]
    Cancelled,

    /// One or more compilation units failed; every failure is listed.
    #[error("{}", render_failures(.failures))]
    CompileFailed { failures: Vec<UnitFailure> },
}

/// A compilation unit that failed, with the error that failed it.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: CompilationUnit,
    pub error: BuildError,
}

impl BuildError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a missing-input error.
    pub fn missing(path: impl Into<PathBuf>, what: &'static str) -> Self {
        Self::MissingInput {
            path: path.into(),
            what,
        }
    }

    /// Create a contract violation for an output that was not produced.
    pub fn contract(capability: Capability, subject: impl Into<String>, expected: &Path) -> Self {
        Self::ToolContract {
            capability,
            subject: subject.into(),
            expected: expected.to_path_buf(),
        }
    }

    /// Whether this error came from an external interrupt.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[allow(clippy::ref_option, reason = "thiserror passes fields by reference")]
fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {code})"),
        None => " (terminated by signal)".to_string(),
    }
}

fn render_failures(failures: &[UnitFailure]) -> String {
    let mut out = format!("{} compilation unit(s) failed", failures.len());
    for failure in failures {
        let _ = write!(out, "\n\n[{}]\n{}", failure.unit.name(), failure.error);
    }
    out
}
