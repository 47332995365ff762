//! Prepare and cleanup scripts bracketing a run.
//!
//! Scripts are opaque strings handed to the shell as `sh -c <script>`. Their
//! variables are layered over the run's credential environment, so a script
//! sees the same provider credentials Terraform does.

use std::ffi::OsString;
use std::fmt;

use camino::Utf8Path;
use thiserror::Error;
use tracing::info;

use crate::config::ScriptConfig;
use crate::environment::ProcessEnvironment;
use crate::runner::{CommandRunner, InvocationContext, RunnerError};

/// Which hook ran.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Hook {
    /// Runs before any Terraform invocation.
    Prepare,
    /// Runs after the lifecycle branch.
    Cleanup,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Cleanup => "cleanup",
        })
    }
}

/// Errors raised by hook scripts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HookError {
    /// Raised when a script exits non-zero.
    #[error("{hook} script exited with status {status}: {stderr}")]
    Failed {
        /// Hook that failed.
        hook: Hook,
        /// Exit status text.
        status: String,
        /// Stderr captured from the script.
        stderr: String,
    },
    /// Raised when the shell cannot be started.
    #[error("{hook} script could not start: {source}")]
    Spawn {
        /// Hook that failed.
        hook: Hook,
        /// Underlying runner error.
        source: RunnerError,
    },
}

/// Prepare and cleanup scripts with their variables.
#[derive(Debug)]
pub struct ScriptHooks<'a, R> {
    runner: &'a R,
    shell: &'a str,
    script: Option<&'a ScriptConfig>,
    context: InvocationContext,
}

impl<'a, R: CommandRunner> ScriptHooks<'a, R> {
    /// Binds the hooks of `script` to a shell, working directory and the
    /// run's credential environment.
    #[must_use]
    pub fn new(
        runner: &'a R,
        shell: &'a str,
        script: Option<&'a ScriptConfig>,
        working_dir: &Utf8Path,
        credentials: &ProcessEnvironment,
    ) -> Self {
        let mut env = credentials.clone();
        if let Some(config) = script {
            for (key, value) in &config.env {
                env.set(key.clone(), value.clone());
            }
        }
        Self {
            runner,
            shell,
            script,
            context: InvocationContext::in_dir(working_dir, env),
        }
    }

    /// Runs the prepare script, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] when the script fails or cannot start.
    pub fn prepare(&self) -> Result<(), HookError> {
        self.run(Hook::Prepare, self.script.and_then(|s| s.prepare.as_deref()))
    }

    /// Runs the cleanup script, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`HookError`] when the script fails or cannot start.
    pub fn cleanup(&self) -> Result<(), HookError> {
        self.run(Hook::Cleanup, self.script.and_then(|s| s.cleanup.as_deref()))
    }

    fn run(&self, hook: Hook, script: Option<&str>) -> Result<(), HookError> {
        let Some(script) = script else {
            return Ok(());
        };
        let args = [OsString::from("-c"), OsString::from(script)];
        let output = self
            .runner
            .run(self.shell, &args, &self.context)
            .map_err(|source| HookError::Spawn { hook, source })?;
        if !output.is_success() {
            return Err(HookError::Failed {
                hook,
                status: output.status_text(),
                stderr: output.stderr,
            });
        }
        info!(%hook, "hook finished");
        Ok(())
    }
}
