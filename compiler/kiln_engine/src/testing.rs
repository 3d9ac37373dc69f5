//! An in-process toolchain for tests.
//!
//! [`FakeToolchain`] writes plausible outputs instead of running a compiler
//! and records every invocation. Every file it writes, and every file passed
//! to [`FakeToolchain::touch`], gets its mtime from a logical clock that
//! starts an hour in the future and advances one second per stamp. Outputs
//! are therefore always strictly newer than files a test created normally,
//! and ordering never depends on filesystem timestamp resolution.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cancel::CancelToken;
use crate::error::{BuildError, BuildResult};
use crate::link::wasm_companion;
use crate::toolchain::{Capability, HeaderJob, LinkJob, ToolOutput, Toolchain, UnitJob};

/// One recorded toolchain call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub capability: Capability,
    /// Header, source, merged object, archive or artifact, per capability.
    pub subject: PathBuf,
}

#[derive(Default)]
struct FakeState {
    invocations: Vec<Invocation>,
    failing: FxHashSet<PathBuf>,
    extra_deps: FxHashMap<PathBuf, Vec<PathBuf>>,
    omitted: FxHashSet<Capability>,
    cancel_on: Option<(PathBuf, CancelToken)>,
    version: String,
}

pub struct FakeToolchain {
    state: Mutex<FakeState>,
    clock: Mutex<SystemTime>,
}

impl Default for FakeToolchain {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeToolchain {
    pub fn new() -> Self {
        FakeToolchain {
            state: Mutex::new(FakeState {
                version: "fake-em++ 1.0".to_string(),
                ..FakeState::default()
            }),
            clock: Mutex::new(SystemTime::now() + Duration::from_secs(3600)),
        }
    }

    /// Compiling `source` fails with a diagnostic.
    pub fn fail_source(&self, source: impl Into<PathBuf>) {
        self.state.lock().failing.insert(source.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Report `header` as a dependency of `source` (or of the PCH header).
    pub fn add_dependency(&self, source: impl Into<PathBuf>, header: impl Into<PathBuf>) {
        self.state
            .lock()
            .extra_deps
            .entry(source.into())
            .or_default()
            .push(header.into());
    }

    /// `capability` reports success without producing its output.
    pub fn omit_output(&self, capability: Capability) {
        self.state.lock().omitted.insert(capability);
    }

    /// Set `token` and fail as interrupted when `source` is compiled.
    pub fn cancel_on(&self, source: impl Into<PathBuf>, token: CancelToken) {
        self.state.lock().cancel_on = Some((source.into(), token));
    }

    pub fn set_version(&self, version: impl Into<String>) {
        self.state.lock().version = version.into();
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    pub fn count(&self, capability: Capability) -> usize {
        self.state
            .lock()
            .invocations
            .iter()
            .filter(|i| i.capability == capability)
            .count()
    }

    /// Sources passed to the unit compiler, sorted.
    pub fn compiled_sources(&self) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = self
            .state
            .lock()
            .invocations
            .iter()
            .filter(|i| i.capability == Capability::CompileUnit)
            .map(|i| i.subject.clone())
            .collect();
        sources.sort();
        sources
    }

    pub fn reset_invocations(&self) {
        self.state.lock().invocations.clear();
    }

    /// Give `path` the next logical timestamp, creating it if needed.
    pub fn touch(&self, path: &Path) -> BuildResult<()> {
        if !path.exists() {
            fs::write(path, "").map_err(|e| BuildError::io(path, e))?;
        }
        self.stamp(path)
    }

    /// Overwrite `path` with `contents` and give it the next timestamp.
    pub fn write(&self, path: &Path, contents: &str) -> BuildResult<()> {
        fs::write(path, contents).map_err(|e| BuildError::io(path, e))?;
        self.stamp(path)
    }

    fn stamp(&self, path: &Path) -> BuildResult<()> {
        let mut clock = self.clock.lock();
        *clock += Duration::from_secs(1);
        fs::File::options()
            .write(true)
            .open(path)
            .and_then(|f| f.set_modified(*clock))
            .map_err(|e| BuildError::io(path, e))
    }

    fn record(&self, capability: Capability, subject: &Path) {
        self.state.lock().invocations.push(Invocation {
            capability,
            subject: subject.to_path_buf(),
        });
    }

    fn omits(&self, capability: Capability) -> bool {
        self.state.lock().omitted.contains(&capability)
    }

    fn emit(&self, path: &Path, contents: &str) -> BuildResult<()> {
        fs::write(path, contents).map_err(|e| BuildError::io(path, e))?;
        self.stamp(path)
    }

    /// Depfile for `target` compiled from `input`: the input, anything it
    /// `#include`s by quoted path, and any registered extra dependencies.
    fn emit_depfile(&self, depfile: &Path, target: &Path, input: &Path) -> BuildResult<()> {
        let mut deps = vec![input.to_path_buf()];
        if let Ok(text) = fs::read_to_string(input) {
            deps.extend(text.lines().filter_map(quoted_include).map(PathBuf::from));
        }
        if let Some(extra) = self.state.lock().extra_deps.get(input) {
            deps.extend(extra.iter().cloned());
        }
        let rendered: Vec<String> = deps.iter().map(|d| escape(d)).collect();
        let text = format!("{}: \\\n  {}\n", escape(target), rendered.join(" \\\n  "));
        self.emit(depfile, &text)
    }

    fn check_cancel(&self, source: &Path, cancel: &CancelToken) -> BuildResult<()> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        if let Some((trigger, token)) = &self.state.lock().cancel_on {
            if trigger == source {
                token.cancel();
                return Err(BuildError::Cancelled);
            }
        }
        Ok(())
    }
}

fn quoted_include(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix("#include \"")
        .and_then(|rest| rest.strip_suffix('"'))
}

fn escape(path: &Path) -> String {
    path.display().to_string().replace(' ', "\\ ")
}

fn failure(command: String, stderr: String) -> ToolOutput {
    ToolOutput {
        success: false,
        exit_code: Some(1),
        stdout: String::new(),
        stderr,
        command,
    }
}

impl Toolchain for FakeToolchain {
    fn version(&self) -> BuildResult<String> {
        Ok(self.state.lock().version.clone())
    }

    fn compile_header(&self, job: &HeaderJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput> {
        self.check_cancel(job.header, cancel)?;
        self.record(Capability::CompileHeader, job.header);
        let command = format!("fake-em++ -x c++-header {}", job.header.display());
        if self.state.lock().failing.contains(job.header) {
            let stderr = format!("{}:1:1: error: injected failure", job.header.display());
            return Ok(failure(command, stderr));
        }
        if !self.omits(Capability::CompileHeader) {
            self.emit(job.output, &format!("pch {}\n", job.flags.join(" ")))?;
            self.emit_depfile(job.depfile, job.output, job.header)?;
        }
        Ok(ToolOutput::succeeded(command))
    }

    fn compile_unit(&self, job: &UnitJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput> {
        self.check_cancel(job.source, cancel)?;
        self.record(Capability::CompileUnit, job.source);
        let command = format!("fake-em++ -c {}", job.source.display());
        if self.state.lock().failing.contains(job.source) {
            let stderr = format!("{}:1:1: error: injected failure", job.source.display());
            return Ok(failure(command, stderr));
        }
        if !job.source.exists() {
            let stderr = format!("error: no such file: '{}'", job.source.display());
            return Ok(failure(command, stderr));
        }
        if !self.omits(Capability::CompileUnit) {
            self.emit(job.object, &format!("object {}\n", job.source.display()))?;
            self.emit_depfile(job.depfile, job.object, job.source)?;
        }
        Ok(ToolOutput::succeeded(command))
    }

    fn partial_link(
        &self,
        response_file: &Path,
        output: &Path,
        cancel: &CancelToken,
    ) -> BuildResult<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        self.record(Capability::PartialLink, output);
        let members = fs::read_to_string(response_file).map_err(|e| BuildError::io(response_file, e))?;
        if !self.omits(Capability::PartialLink) {
            self.emit(output, &members)?;
        }
        Ok(ToolOutput::succeeded(format!(
            "fake-em++ -r @{} -o {}",
            response_file.display(),
            output.display()
        )))
    }

    fn archive(
        &self,
        members: &[PathBuf],
        archive: &Path,
        cancel: &CancelToken,
    ) -> BuildResult<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        self.record(Capability::Archive, archive);
        if !self.omits(Capability::Archive) {
            let listing: Vec<String> = members.iter().map(|m| m.display().to_string()).collect();
            self.emit(archive, &format!("!<thin>\n{}\n", listing.join("\n")))?;
        }
        Ok(ToolOutput::succeeded(format!("fake-emar rcs --thin {}", archive.display())))
    }

    fn link(&self, job: &LinkJob<'_>, cancel: &CancelToken) -> BuildResult<ToolOutput> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        self.record(Capability::Link, job.output);
        if !self.omits(Capability::Link) {
            self.emit(job.output, &format!("// linked with {}\n", job.link_flags.join(" ")))?;
            self.emit(&wasm_companion(job.output), "\0asm")?;
        }
        Ok(ToolOutput::succeeded(format!("fake-em++ -o {}", job.output.display())))
    }
}
