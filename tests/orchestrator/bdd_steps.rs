//! BDD step definitions for lifecycle orchestration.

use mct::backend::ApiMethod;
use mct::test_support::{RecordingTransport, ScriptedRunner, json_outputs};
use mct::{Orchestrator, ResolvedConfiguration, RunError, RunId, RunnerConfig};
use rstest_bdd_macros::{given, then, when};
use serde_json::{Value, json};
use tokio::runtime::Builder;

use super::test_helpers::{
    FailureKind, OrchestratorContext, OrchestratorTestError, RunOutcome, SuiteSummary,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] OrchestratorTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn step_list(steps: &str) -> Vec<String> {
    steps
        .split(',')
        .map(str::trim)
        .filter(|step| !step.is_empty())
        .map(str::to_owned)
        .collect()
}

fn object_storage_secrets() -> Value {
    json!({
        "storage-account-name": "acct",
        "storage-account-container": "tfstate",
        "storage-account-sas": "sv=2020&sig=abc"
    })
}

#[given("an object-storage run document with steps \"{steps}\"")]
fn object_storage_document(
    mut orchestrator_context: OrchestratorContext,
    steps: String,
) -> OrchestratorContext {
    orchestrator_context.document = json!({
        "parameters": {"location": "westeurope"},
        "backend": {"type": "azurerm", "key": "prod.tfstate"},
        "secrets": {"azurerm-backend": object_storage_secrets()},
        "steps": step_list(&steps)
    });
    orchestrator_context
}

#[given("an object-storage run document without backend secrets")]
fn object_storage_document_without_secrets(
    mut orchestrator_context: OrchestratorContext,
) -> OrchestratorContext {
    orchestrator_context.document = json!({
        "backend": {"type": "azurerm", "key": "prod.tfstate"},
        "steps": ["deploy"]
    });
    orchestrator_context
}

#[given("a hosted-workspace run document with steps \"{steps}\"")]
fn hosted_document(
    mut orchestrator_context: OrchestratorContext,
    steps: String,
) -> OrchestratorContext {
    orchestrator_context.document = json!({
        "backend": {"type": "terraform-cloud", "org": "acme", "workspace": "infra"},
        "secrets": {"terraform-cloud-backend": {"token": "tfc-token"}},
        "steps": step_list(&steps)
    });
    orchestrator_context
}

#[given("a cleanup script \"{script}\"")]
fn cleanup_script(mut orchestrator_context: OrchestratorContext, script: String) -> OrchestratorContext {
    orchestrator_context.document["script"] = json!({"cleanup": script});
    orchestrator_context
}

#[given("compliance suites \"{first}\" and \"{second}\"")]
fn compliance_suites(
    mut orchestrator_context: OrchestratorContext,
    first: String,
    second: String,
) -> Result<OrchestratorContext, StepError> {
    let tests_path = orchestrator_context.tests_path();
    for name in [&first, &second] {
        std::fs::create_dir_all(tests_path.join(name)).map_err(OrchestratorTestError::from)?;
    }
    orchestrator_context.document["tests_path"] = json!(tests_path.as_str());
    Ok(orchestrator_context)
}

#[given("terraform succeeds for init")]
fn terraform_init_succeeds(orchestrator_context: OrchestratorContext) -> OrchestratorContext {
    orchestrator_context.runner.push_success();
    orchestrator_context
}

#[given("terraform succeeds \"{count}\" times")]
fn terraform_succeeds(orchestrator_context: OrchestratorContext, count: usize) -> OrchestratorContext {
    for _ in 0..count {
        orchestrator_context.runner.push_success();
    }
    orchestrator_context
}

#[given("terraform lists workspaces \"{names}\"")]
fn terraform_lists_workspaces(
    orchestrator_context: OrchestratorContext,
    names: String,
) -> OrchestratorContext {
    let listing = names
        .split(',')
        .map(|name| format!("  {}\n", name.trim()))
        .collect::<String>();
    orchestrator_context.runner.push_stdout(listing);
    orchestrator_context
}

#[given("terraform reports outputs for project \"{project}\"")]
fn terraform_outputs(orchestrator_context: OrchestratorContext, project: String) -> OrchestratorContext {
    orchestrator_context.runner.push_stdout(json_outputs(&[
        ("gcp_project_id", project.as_str(), false),
        ("gcp_project_service_account", "{}", true),
    ]));
    orchestrator_context
}

#[given("terraform fails with exit code \"{code}\"")]
fn terraform_fails(orchestrator_context: OrchestratorContext, code: i32) -> OrchestratorContext {
    orchestrator_context.runner.push_failure(code);
    orchestrator_context
}

#[given("inspec exits with \"{code}\"")]
fn inspec_exits(orchestrator_context: OrchestratorContext, code: i32) -> OrchestratorContext {
    orchestrator_context
        .runner
        .push_output(Some(code), "inspec output", "");
    orchestrator_context
}

#[given("the cleanup script succeeds")]
fn cleanup_succeeds(orchestrator_context: OrchestratorContext) -> OrchestratorContext {
    orchestrator_context.runner.push_success();
    orchestrator_context
}

#[when("I execute run \"{id}\"")]
fn execute_run(
    mut orchestrator_context: OrchestratorContext,
    id: String,
) -> Result<OrchestratorContext, StepError> {
    let runtime = Builder::new_current_thread()
        .build()
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let resolved = ResolvedConfiguration::from_json_str(&orchestrator_context.document.to_string())
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let run_id = RunId::new(id).map_err(|err| StepError::Assertion(err.to_string()))?;
    let mut config = RunnerConfig::with_defaults();
    config.credentials_path = orchestrator_context
        .root
        .join("creds.json")
        .into_string();
    let orchestrator: Orchestrator<ScriptedRunner, RecordingTransport> = Orchestrator::new(
        orchestrator_context.runner.clone(),
        orchestrator_context.transport.clone(),
        config,
    );
    let working_dir = orchestrator_context.working_dir();

    let result = runtime.block_on(orchestrator.execute(&resolved, &run_id, &working_dir));
    let outcome = match result {
        Ok(report) => RunOutcome::Success {
            outputs: report
                .output
                .as_ref()
                .map(|output| output.names().map(str::to_owned).collect())
                .unwrap_or_default(),
            suites: report
                .tests
                .iter()
                .map(|suite| SuiteSummary {
                    name: suite.name.clone(),
                    verdict: suite.verdict.to_string(),
                })
                .collect(),
        },
        Err(err) => RunOutcome::Failure {
            kind: failure_kind(&err),
            message: err.to_string(),
        },
    };
    orchestrator_context.outcome = Some(outcome);
    Ok(orchestrator_context)
}

#[then("the run succeeds")]
fn run_succeeds(orchestrator_context: &OrchestratorContext) -> Result<(), StepError> {
    match &orchestrator_context.outcome {
        Some(RunOutcome::Success { .. }) => Ok(()),
        Some(RunOutcome::Failure { message, .. }) => Err(StepError::Assertion(format!(
            "expected success, got failure: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the run fails with a \"{kind}\" error")]
fn run_fails(orchestrator_context: &OrchestratorContext, kind: String) -> Result<(), StepError> {
    let expected = parse_failure_kind(&kind)?;
    let Some(RunOutcome::Failure { kind: actual, .. }) = &orchestrator_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    if *actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure kind {expected:?}, got {actual:?}"
        )))
    }
}

#[then("terraform ran \"{command}\"")]
fn terraform_ran(orchestrator_context: &OrchestratorContext, command: String) -> Result<(), StepError> {
    let commands = orchestrator_context.commands();
    if commands.contains(&command) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected `{command}` among {commands:?}"
        )))
    }
}

#[then("terraform did not run \"{command}\"")]
fn terraform_did_not_run(
    orchestrator_context: &OrchestratorContext,
    command: String,
) -> Result<(), StepError> {
    let commands = orchestrator_context.commands();
    if commands.contains(&command) {
        Err(StepError::Assertion(format!(
            "`{command}` should not run, got {commands:?}"
        )))
    } else {
        Ok(())
    }
}

#[then("no external command ran")]
fn no_command_ran(orchestrator_context: &OrchestratorContext) -> Result<(), StepError> {
    let commands = orchestrator_context.commands();
    if commands.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no commands, got {commands:?}"
        )))
    }
}

#[then("the cleanup script ran")]
fn cleanup_ran(orchestrator_context: &OrchestratorContext) -> Result<(), StepError> {
    let commands = orchestrator_context.commands();
    match commands.last() {
        Some(last) if last.starts_with("sh -c ") => Ok(()),
        _ => Err(StepError::Assertion(format!(
            "expected the cleanup script last, got {commands:?}"
        ))),
    }
}

#[then("the hosted API received a \"{method}\" request")]
fn api_received(orchestrator_context: &OrchestratorContext, method: String) -> Result<(), StepError> {
    let expected = parse_method(&method)?;
    let count = count_requests(orchestrator_context, expected);
    if count == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one {method} request, got {count}"
        )))
    }
}

#[then("the hosted API received no \"{method}\" request")]
fn api_not_received(
    orchestrator_context: &OrchestratorContext,
    method: String,
) -> Result<(), StepError> {
    let expected = parse_method(&method)?;
    match count_requests(orchestrator_context, expected) {
        0 => Ok(()),
        count => Err(StepError::Assertion(format!(
            "expected no {method} request, got {count}"
        ))),
    }
}

#[then("the report carries output \"{name}\"")]
fn report_output(orchestrator_context: &OrchestratorContext, name: String) -> Result<(), StepError> {
    match &orchestrator_context.outcome {
        Some(RunOutcome::Success { outputs, .. }) if outputs.contains(&name) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected output {name}, got {other:?}"
        ))),
    }
}

#[then("suite \"{name}\" is recorded as \"{verdict}\"")]
fn suite_recorded(
    orchestrator_context: &OrchestratorContext,
    name: String,
    verdict: String,
) -> Result<(), StepError> {
    let Some(RunOutcome::Success { suites, .. }) = &orchestrator_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected success outcome",
        )));
    };
    match suites.iter().find(|suite| suite.name == name) {
        Some(suite) if suite.verdict == verdict => Ok(()),
        Some(suite) => Err(StepError::Assertion(format!(
            "suite {name}: expected {verdict}, got {}",
            suite.verdict
        ))),
        None => Err(StepError::Assertion(format!("suite {name} was not run"))),
    }
}

fn count_requests(orchestrator_context: &OrchestratorContext, method: ApiMethod) -> usize {
    orchestrator_context
        .transport
        .requests()
        .iter()
        .filter(|request| request.method == method)
        .count()
}

fn parse_method(method: &str) -> Result<ApiMethod, StepError> {
    match method {
        "PATCH" => Ok(ApiMethod::Patch),
        "DELETE" => Ok(ApiMethod::Delete),
        other => Err(StepError::Assertion(format!("unknown method {other}"))),
    }
}

const fn failure_kind(err: &RunError) -> FailureKind {
    match err {
        RunError::Config(_) => FailureKind::Config,
        RunError::Hook(_) => FailureKind::Hook,
        RunError::Provisioning(_) => FailureKind::Provisioning,
        RunError::Backend(_) => FailureKind::Backend,
        RunError::Compliance(_) => FailureKind::Compliance,
        RunError::CleanupAfterFailure { .. } => FailureKind::CleanupAfterFailure,
    }
}

fn parse_failure_kind(kind: &str) -> Result<FailureKind, StepError> {
    match kind {
        "config" => Ok(FailureKind::Config),
        "hook" => Ok(FailureKind::Hook),
        "provisioning" => Ok(FailureKind::Provisioning),
        "backend" => Ok(FailureKind::Backend),
        "compliance" => Ok(FailureKind::Compliance),
        "cleanup-after-failure" => Ok(FailureKind::CleanupAfterFailure),
        other => Err(StepError::Assertion(format!("unknown failure kind {other}"))),
    }
}
