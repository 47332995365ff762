//! Error types for the Terraform session.

use thiserror::Error;

use super::SessionState;
use crate::runner::RunnerError;

/// Errors raised while driving the provisioning tool.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisioningError {
    /// Raised when `terraform` exits non-zero. Output is kept verbatim.
    #[error(
        "terraform {subcommand} exited with status {status_text}: {}",
        diagnostics(.stderr, .stdout)
    )]
    CommandFailed {
        /// Subcommand that failed (for example `plan`).
        subcommand: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stdout captured from the process.
        stdout: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when an operation is attempted out of sequence. No process is
    /// started.
    #[error("cannot run {operation} while the session is {state}")]
    InvalidState {
        /// Operation that was refused.
        operation: &'static str,
        /// State the session was in.
        state: SessionState,
    },
    /// Raised when `terraform output -json` cannot be parsed.
    #[error("failed to parse terraform output: {message}")]
    Output {
        /// Parser error message.
        message: String,
    },
    /// Raised when the process cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Joins the non-empty captured streams, stderr first, for error reports.
fn diagnostics(stderr: &str, stdout: &str) -> String {
    [stderr.trim_end(), stdout.trim_end()]
        .into_iter()
        .filter(|stream| !stream.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
