//! Binary entry point for the `mct` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir, fs_utf8::OpenOptions};
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use mct::{
    BackendError, ConfigError, Orchestrator, ReqwestTransport, ResolvedConfiguration,
    RunError, RunId, RunReport, RunnerConfig, Step, Steps, StreamingCommandRunner,
};

mod cli;

use cli::{Cli, RunCommand};


/// Variable holding the tracing filter directives.
const LOG_FILTER_VAR: &str = "MCT_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("run failed: {0}")]
    Run(#[from] RunError),
    #[error("failed to set up logging: {0}")]
    Logging(String),
    #[error("failed to write report: {0}")]
    Report(#[from] io::Error),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => {
            init_logging(command.log_path.as_deref(), command.debug)?;
            run_command(command).await
        }
    }
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let run_id = RunId::new(args.id.as_str())?;
    let mut resolved = ResolvedConfiguration::load(
        Utf8Path::new(&args.config),
        args.secrets.as_deref().map(Utf8Path::new),
    )?;
    apply_overrides(&mut resolved, &args)?;

    let config = RunnerConfig::load_without_cli_args()?;
    let transport = ReqwestTransport::new()?;
    let orchestrator = Orchestrator::new(StreamingCommandRunner, transport, config);
    let report = orchestrator
        .execute(&resolved, &run_id, Utf8Path::new(&args.workspace))
        .await?;

    write_report(io::stdout(), &report)?;
    Ok(0)
}

fn apply_overrides(
    resolved: &mut ResolvedConfiguration,
    args: &RunCommand,
) -> Result<(), ConfigError> {
    if let Some(steps) = &args.steps {
        resolved.steps = Steps::parse(steps)?;
    }
    if let Some(tests_path) = &args.tests_path {
        resolved.tests_path = Some(Utf8PathBuf::from(tests_path));
    }
    Ok(())
}

fn init_logging(log_path: Option<&str>, debug: bool) -> Result<(), CliError> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_VAR).unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match log_path {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(open_log_file(Utf8Path::new(path))?))
            .try_init(),
        None => builder.with_writer(io::stderr).try_init(),
    };
    installed.map_err(|err| CliError::Logging(err.to_string()))
}

fn open_log_file(path: &Utf8Path) -> Result<std::fs::File, CliError> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| CliError::Logging(format!("{path}: path is missing a filename")))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| CliError::Logging(format!("{parent}: {err}")))?;
    let file = dir
        .open_with(file_name, OpenOptions::new().create(true).append(true))
        .map_err(|err| CliError::Logging(format!("{path}: {err}")))?;
    Ok(file.into_std())
}

fn write_report(mut target: impl Write, report: &RunReport) -> io::Result<()> {
    let step = report.step.map_or("none", Step::as_str);
    writeln!(
        target,
        "run {} finished (step: {step}, backend: {})",
        report.run_id, report.backend
    )?;
    if let Some(output) = &report.output {
        for name in output.names() {
            let rendered = match output.get(name) {
                Some(value) if value.sensitive => String::from("<sensitive>"),
                Some(value) => value.render(),
                None => continue,
            };
            writeln!(target, "output {name} = {rendered}")?;
        }
    }
    for suite in &report.tests {
        writeln!(
            target,
            "test {}: {} ({})",
            suite.name, suite.verdict, suite.log_path
        )?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
