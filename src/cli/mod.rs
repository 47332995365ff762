//! Command-line interface definitions for the `mct` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `mct` binary.
#[derive(Debug, Parser)]
#[command(
    name = "mct",
    about = "Deploy, test, and destroy infrastructure with Terraform",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run the lifecycle steps of a resolved configuration.
    #[command(name = "run", about = "Run the lifecycle steps of a resolved configuration")]
    Run(RunCommand),
}

/// Arguments for the `mct run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Resolved configuration document (JSON).
    #[arg(long, value_name = "FILE")]
    pub(crate) config: String,
    /// Separate secrets document (JSON object of scopes), merged over the
    /// configuration's `secrets` section.
    #[arg(long, value_name = "FILE")]
    pub(crate) secrets: Option<String>,
    /// Directory holding the Terraform configuration.
    #[arg(long, value_name = "DIR")]
    pub(crate) workspace: String,
    /// Run identifier, used as the Terraform workspace name.
    #[arg(long, value_name = "ID")]
    pub(crate) id: String,
    /// Steps to run, replacing the configuration's `steps`.
    #[arg(long, value_name = "STEP", value_delimiter = ',')]
    pub(crate) steps: Option<Vec<String>>,
    /// Directory of compliance suites, replacing the configuration's
    /// `tests_path`.
    #[arg(long, value_name = "DIR")]
    pub(crate) tests_path: Option<String>,
    /// Append log output to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    pub(crate) log_path: Option<String>,
    /// Log at debug level unless `MCT_LOG` says otherwise.
    #[arg(long)]
    pub(crate) debug: bool,
}
