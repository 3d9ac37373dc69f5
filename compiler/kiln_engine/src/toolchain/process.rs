//! Subprocess execution with output capture and cancellation.

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{BuildError, BuildResult};

use super::ToolOutput;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

enum Waited {
    Exited(ExitStatus),
    Cancelled,
    Failed(std::io::Error),
}

/// Run `cmd` to completion, capturing stdout and stderr.
///
/// The child is polled so that setting `cancel` kills it promptly.
/// A non-zero exit is returned as an unsuccessful [`ToolOutput`], not an error.
///
/// Only the direct child is killed. `em++` is a wrapper script, so the
/// compiler it started may outlive it and keep the pipes open; on cancel the
/// pipe readers are detached rather than joined, and they finish whenever
/// that grandchild exits. Its output is staged and never promoted.
pub fn run_command(mut cmd: Command, cancel: &CancelToken) -> BuildResult<ToolOutput> {
    if cancel.is_cancelled() {
        return Err(BuildError::Cancelled);
    }

    let rendered = render_command(&cmd);
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::trace!(command = %rendered, "spawn");
    let mut child = cmd.spawn().map_err(|e| BuildError::ToolUnavailable {
        program,
        message: e.to_string(),
    })?;

    // Pipes are drained concurrently so a chatty tool never blocks on a full pipe.
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let waited = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Waited::Exited(status),
            Ok(None) => {}
            Err(e) => break Waited::Failed(e),
        }
        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            break Waited::Cancelled;
        }
        thread::sleep(POLL_INTERVAL);
    };

    match waited {
        Waited::Exited(status) => Ok(ToolOutput {
            success: status.success(),
            exit_code: status.code(),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            command: rendered,
        }),
        Waited::Cancelled => Err(BuildError::Cancelled),
        Waited::Failed(e) => Err(BuildError::ToolUnavailable {
            program: rendered,
            message: e.to_string(),
        }),
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || read_pipe(pipe))
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Render a command the way a user would type it.
pub fn render_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.contains(' ') {
                format!("\"{arg}\"")
            } else {
                arg.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
