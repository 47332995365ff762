//! Compliance suites run with InSpec against a fresh deployment.
//!
//! Each immediate subdirectory of the tests path is one suite. Suites run in
//! name order, each as `inspec exec <dir> -t <target> --input
//! gcp_project_id=<id>`, and a failing suite never stops the others. The
//! combined output of every suite is written next to it as
//! `<name>_result.log`.
//!
//! The service-account key is written owner-only for the duration of the
//! suites and removed afterwards.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::{Dir, OpenOptions};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::environment::ProcessEnvironment;
use crate::runner::{CommandOutput, CommandRunner, InvocationContext};
use crate::terraform::{DeploymentOutput, OutputValue};

/// Variable pointing the GCP InSpec resource pack at the credentials file.
pub const CREDENTIALS_VARIABLE: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Permission bits of the credentials file on Unix.
pub const CREDENTIALS_MODE: u32 = 0o600;

/// Settings for the compliance phase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ComplianceSettings {
    /// Path to the `inspec` executable.
    pub inspec_bin: String,
    /// Target URI passed with `-t`.
    pub target: String,
    /// Deployment output holding service-account credentials.
    pub credentials_output: String,
    /// Deployment output holding the project identifier.
    pub project_output: String,
    /// Where the credentials are written for the suites.
    pub credentials_path: Utf8PathBuf,
}

impl From<&RunnerConfig> for ComplianceSettings {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            inspec_bin: config.inspec_bin.clone(),
            target: config.inspec_target.clone(),
            credentials_output: config.credentials_output.clone(),
            project_output: config.project_output.clone(),
            credentials_path: Utf8PathBuf::from(&config.credentials_path),
        }
    }
}

/// Outcome of one suite.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SuiteVerdict {
    /// `inspec` exited zero.
    Pass,
    /// `inspec` exited non-zero, or did not start (`code` is `None`).
    Fail {
        /// Exit code, when the process produced one.
        code: Option<i32>,
    },
}

impl fmt::Display for SuiteVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail { code: Some(code) } => write!(f, "FAIL ({code})"),
            Self::Fail { code: None } => f.write_str("FAIL (not started)"),
        }
    }
}

/// Result of one suite.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SuiteResult {
    /// Suite directory name.
    pub name: String,
    /// Pass or fail.
    pub verdict: SuiteVerdict,
    /// Log holding the suite's combined output.
    pub log_path: Utf8PathBuf,
}

/// Errors that stop the compliance phase as a whole.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ComplianceError {
    /// Raised when the deployment did not produce a required output.
    #[error("deployment output `{name}` is required by the compliance suites")]
    MissingOutput {
        /// Output name.
        name: String,
    },
    /// Raised when the tests path, credentials file, or a result log cannot
    /// be accessed.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Runs the suites under a tests path.
#[derive(Debug)]
pub struct ComplianceRunner<'a, R> {
    runner: &'a R,
    settings: &'a ComplianceSettings,
}

impl<'a, R: CommandRunner> ComplianceRunner<'a, R> {
    /// Creates a runner using `settings`.
    #[must_use]
    pub const fn new(runner: &'a R, settings: &'a ComplianceSettings) -> Self {
        Self { runner, settings }
    }

    /// Runs every suite under `tests_path` against the deployment described
    /// by `output`. `env` carries the run's credential variables.
    ///
    /// # Errors
    ///
    /// Returns [`ComplianceError::MissingOutput`] when `output` lacks the
    /// credentials or project output, and [`ComplianceError::Io`] when the
    /// tests path, credentials file, or a result log cannot be accessed.
    /// Individual suite failures are reported in the results instead.
    pub fn run(
        &self,
        tests_path: &Utf8Path,
        output: &DeploymentOutput,
        env: &ProcessEnvironment,
    ) -> Result<Vec<SuiteResult>, ComplianceError> {
        let credentials = require_output(output, &self.settings.credentials_output)?;
        let project_id = require_output(output, &self.settings.project_output)?;
        let tests_dir = open_dir(tests_path)?;
        let suites = discover_suites(&tests_dir, tests_path)?;

        let credentials_dir = self.write_credentials(&credentials)?;
        let mut suite_env = env.clone();
        suite_env.set(CREDENTIALS_VARIABLE, self.settings.credentials_path.as_str());
        suite_env.set("CHEF_LICENSE", "accept");

        let results = suites
            .iter()
            .map(|name| self.run_suite(&tests_dir, tests_path, name, &project_id, &suite_env))
            .collect();
        self.remove_credentials(&credentials_dir);
        results
    }

    /// Writes the key to a freshly created `0600` file and returns the
    /// directory holding it. A file left by an earlier run is replaced.
    fn write_credentials(&self, credentials: &str) -> Result<Dir, ComplianceError> {
        let path = &self.settings.credentials_path;
        let (parent, file_name) = split_file_path(path)?;
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let dir = open_dir(parent)?;
        if let Err(err) = dir.remove_file(file_name) {
            if err.kind() != io::ErrorKind::NotFound {
                return Err(io_error(path, &err));
            }
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use cap_std::fs_utf8::OpenOptionsExt;
            options.mode(CREDENTIALS_MODE);
        }
        let mut file = dir
            .open_with(file_name, &options)
            .map_err(|err| io_error(path, &err))?;
        file.write_all(credentials.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| io_error(path, &err))?;
        Ok(dir)
    }

    fn remove_credentials(&self, dir: &Dir) {
        let path = &self.settings.credentials_path;
        let removed = path
            .file_name()
            .map_or(Ok(()), |file_name| dir.remove_file(file_name));
        if let Err(err) = removed {
            warn!(path = %path, error = %err, "credentials file not removed");
        }
    }

    fn run_suite(
        &self,
        tests_dir: &Dir,
        tests_path: &Utf8Path,
        name: &str,
        project_id: &str,
        env: &ProcessEnvironment,
    ) -> Result<SuiteResult, ComplianceError> {
        let suite_path = tests_path.join(name);
        info!(suite = name, "running compliance suite");
        let args = [
            OsString::from("exec"),
            OsString::from(suite_path.as_str()),
            OsString::from("-t"),
            OsString::from(&self.settings.target),
            OsString::from("--input"),
            OsString::from(format!("{}={project_id}", self.settings.project_output)),
        ];
        let context = InvocationContext {
            env: env.clone(),
            ..InvocationContext::default()
        };

        let (verdict, log) = match self.runner.run(&self.settings.inspec_bin, &args, &context) {
            Ok(output) => (verdict_for(&output), output.combined()),
            Err(err) => (SuiteVerdict::Fail { code: None }, err.to_string()),
        };
        if verdict == SuiteVerdict::Pass {
            info!(suite = name, %verdict, "compliance suite finished");
        } else {
            warn!(suite = name, %verdict, "compliance suite finished");
        }

        let log_name = format!("{name}_result.log");
        let log_path = suite_path.join(&log_name);
        tests_dir
            .write(Utf8Path::new(name).join(&log_name), log)
            .map_err(|err| io_error(&log_path, &err))?;

        Ok(SuiteResult {
            name: name.to_owned(),
            verdict,
            log_path,
        })
    }
}

fn require_output(output: &DeploymentOutput, name: &str) -> Result<String, ComplianceError> {
    output
        .get(name)
        .map(OutputValue::render)
        .ok_or_else(|| ComplianceError::MissingOutput {
            name: name.to_owned(),
        })
}

const fn verdict_for(output: &CommandOutput) -> SuiteVerdict {
    if output.is_success() {
        SuiteVerdict::Pass
    } else {
        SuiteVerdict::Fail { code: output.code }
    }
}

/// Names of the immediate subdirectories of `path`, sorted.
fn discover_suites(dir: &Dir, path: &Utf8Path) -> Result<Vec<String>, ComplianceError> {
    let mut names = Vec::new();
    for item in dir.entries().map_err(|err| io_error(path, &err))? {
        let entry = item.map_err(|err| io_error(path, &err))?;
        let is_dir = entry
            .file_type()
            .map_err(|err| io_error(path, &err))?
            .is_dir();
        if is_dir {
            names.push(entry.file_name().map_err(|err| io_error(path, &err))?);
        }
    }
    names.sort();
    Ok(names)
}

fn open_dir(path: &Utf8Path) -> Result<Dir, ComplianceError> {
    Dir::open_ambient_dir(path, ambient_authority()).map_err(|err| io_error(path, &err))
}

fn split_file_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), ComplianceError> {
    let file_name = path.file_name().ok_or_else(|| ComplianceError::Io {
        path: path.to_path_buf(),
        message: String::from("path has no file name"),
    })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, file_name))
}

fn io_error(path: &Utf8Path, err: &std::io::Error) -> ComplianceError {
    ComplianceError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
