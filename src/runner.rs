//! Command execution seam shared by Terraform, hook scripts, and the
//! compliance runner.
//!
//! Every child process receives an explicit [`InvocationContext`] carrying
//! its working directory and the credential variables layered on top of the
//! inherited environment. The parent process environment is never mutated.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::environment::ProcessEnvironment;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns stdout followed by stderr, as written to result logs.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len());
        combined.push_str(&self.stdout);
        combined.push_str(&self.stderr);
        combined
    }

    /// Human readable exit status (`unknown` when killed by a signal).
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Whether a child's output is shown to the operator while it runs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OutputMode {
    /// Output is echoed to this process's stdout and stderr and captured.
    #[default]
    Forward,
    /// Output is only captured. Used for machine-readable or sensitive
    /// output such as `terraform output -json`.
    Capture,
}

/// Working directory and environment overlay for one child process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InvocationContext {
    /// Directory the child starts in; inherits the caller's when `None`.
    pub working_dir: Option<Utf8PathBuf>,
    /// Variables added to (or overriding) the inherited environment.
    pub env: ProcessEnvironment,
    /// How the child's output is handled.
    pub output: OutputMode,
}

impl InvocationContext {
    /// Creates a context rooted at `working_dir`.
    #[must_use]
    pub fn in_dir(working_dir: &Utf8Path, env: ProcessEnvironment) -> Self {
        Self {
            working_dir: Some(working_dir.to_path_buf()),
            env,
            output: OutputMode::Forward,
        }
    }

    /// Returns a copy of this context whose output is captured only.
    #[must_use]
    pub fn captured(&self) -> Self {
        Self {
            output: OutputMode::Capture,
            ..self.clone()
        }
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    /// Blocks until the child exits.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        context: &InvocationContext,
    ) -> Result<CommandOutput, RunnerError>;
}

/// Real command runner that shells out to the host operating system and
/// captures output without showing it. Ignores [`OutputMode`].
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        context: &InvocationContext,
    ) -> Result<CommandOutput, RunnerError> {
        let output = build_command(program, args, context)
            .output()
            .map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Command runner that echoes child output line by line to this process's
/// stdout and stderr while capturing it. Contexts in
/// [`OutputMode::Capture`] are run like [`ProcessCommandRunner`].
#[derive(Clone, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        context: &InvocationContext,
    ) -> Result<CommandOutput, RunnerError> {
        if context.output == OutputMode::Capture {
            return ProcessCommandRunner.run(program, args, context);
        }

        let mut child = build_command(program, args, context)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let (stdout, stderr) = thread::scope(|scope| {
            let out = scope.spawn(move || tee(child_stdout, io::stdout()));
            let err = scope.spawn(move || tee(child_stderr, io::stderr()));
            (
                out.join().unwrap_or_default(),
                err.join().unwrap_or_default(),
            )
        });

        let status = child.wait().map_err(|err| RunnerError::Wait {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn build_command(program: &str, args: &[OsString], context: &InvocationContext) -> Command {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(context.env.iter())
        .stdin(Stdio::null());
    if let Some(dir) = &context.working_dir {
        command.current_dir(dir);
    }
    command
}

fn spawn_error(program: &str, err: &io::Error) -> RunnerError {
    RunnerError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

/// Copies `source` into `sink` a line at a time and returns everything read.
/// Echoing stops at the first write failure on `sink`; the pipe is still
/// drained so the child never blocks.
fn tee(source: Option<impl Read>, mut sink: impl Write) -> String {
    let Some(source) = source else {
        return String::new();
    };
    let mut reader = BufReader::new(source);
    let mut captured = Vec::new();
    let mut line = Vec::new();
    let mut echo = true;
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                echo = echo && sink.write_all(&line).and_then(|()| sink.flush()).is_ok();
                captured.extend_from_slice(&line);
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

/// Errors raised before a child process produces a result.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a started command cannot be waited on.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command that was running.
        program: String,
        /// Operating system error string.
        message: String,
    },
}
