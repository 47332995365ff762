//! Shared fixtures for orchestrator BDD scenarios.

use std::rc::Rc;

use camino::Utf8PathBuf;
use mct::test_support::{RecordingTransport, ScriptedRunner};
use rstest::fixture;
use serde_json::{Value, json};
use tempfile::TempDir;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct OrchestratorContext {
    pub runner: ScriptedRunner,
    pub transport: RecordingTransport,
    pub document: Value,
    pub root: Utf8PathBuf,
    pub outcome: Option<RunOutcome>,
    _dir: Rc<TempDir>,
}

impl OrchestratorContext {
    pub fn working_dir(&self) -> Utf8PathBuf {
        self.root.join("infra")
    }

    pub fn tests_path(&self) -> Utf8PathBuf {
        self.root.join("suites")
    }

    /// Terraform subcommands (`workspace new run123`, `plan`) and full shell
    /// lines for everything else, in invocation order.
    pub fn commands(&self) -> Vec<String> {
        self.runner
            .invocations()
            .iter()
            .map(|invocation| {
                if invocation.program == "terraform" {
                    let width = if invocation.has_arg("workspace") { 3 } else { 1 };
                    invocation.leading_args(width)
                } else {
                    invocation.command_string()
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Config,
    Hook,
    Provisioning,
    Backend,
    Compliance,
    CleanupAfterFailure,
}

#[derive(Clone, Debug)]
pub struct SuiteSummary {
    pub name: String,
    pub verdict: String,
}

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Success {
        outputs: Vec<String>,
        suites: Vec<SuiteSummary>,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum OrchestratorTestError {
    #[error("failed to prepare scenario directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("scenario directory is not UTF-8")]
    NonUtf8,
}

#[fixture]
pub fn orchestrator_context_result() -> Result<OrchestratorContext, OrchestratorTestError> {
    let dir = TempDir::new()?;
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .map_err(|_| OrchestratorTestError::NonUtf8)?;
    std::fs::create_dir_all(root.join("infra"))?;
    Ok(OrchestratorContext {
        runner: ScriptedRunner::new(),
        transport: RecordingTransport::new(),
        document: json!({}),
        root,
        outcome: None,
        _dir: Rc::new(dir),
    })
}

#[fixture]
pub fn orchestrator_context(
    orchestrator_context_result: Result<OrchestratorContext, OrchestratorTestError>,
) -> OrchestratorContext {
    orchestrator_context_result
        .unwrap_or_else(|err| panic!("orchestrator context fixture should initialise: {err}"))
}
