use std::fs;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;

use super::*;
use crate::backend::ApiMethod;
use crate::test_support::{RecordingTransport, ScriptedRunner, json_outputs};

struct Harness {
    _dir: TempDir,
    root: Utf8PathBuf,
    runner: ScriptedRunner,
    transport: RecordingTransport,
}

impl Harness {
    fn orchestrator(&self) -> Orchestrator<ScriptedRunner, RecordingTransport> {
        let mut config = RunnerConfig::with_defaults();
        config.credentials_path = self.root.join("creds.json").into_string();
        Orchestrator::new(self.runner.clone(), self.transport.clone(), config)
    }

    fn working_dir(&self) -> Utf8PathBuf {
        self.root.join("infra")
    }

    fn commands(&self) -> Vec<String> {
        self.runner
            .invocations()
            .iter()
            .map(|invocation| {
                if invocation.program == "terraform" {
                    invocation.leading_args(if invocation.has_arg("workspace") { 3 } else { 1 })
                } else {
                    invocation.command_string()
                }
            })
            .collect()
    }

    async fn execute(&self, document: &Value) -> Result<RunReport, RunError> {
        let resolved =
            ResolvedConfiguration::from_json_str(&document.to_string()).expect("valid document");
        let run_id = RunId::new("run123").expect("run id");
        self.orchestrator()
            .execute(&resolved, &run_id, &self.working_dir())
            .await
    }
}

#[fixture]
fn harness() -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
    fs::create_dir_all(root.join("infra")).expect("working dir");
    Harness {
        _dir: dir,
        root,
        runner: ScriptedRunner::new(),
        transport: RecordingTransport::new(),
    }
}

fn object_storage_document(steps: &[&str]) -> Value {
    json!({
        "parameters": {"location": "westeurope"},
        "backend": {"type": "azurerm", "key": "prod.tfstate"},
        "secrets": {
            "azure": {
                "client-id": "cid",
                "client-secret": "csecret",
                "subscription-id": "sub",
                "tenant-id": "tenant"
            },
            "azurerm-backend": {
                "storage-account-name": "acct",
                "storage-account-container": "tfstate",
                "storage-account-sas": "sv=2020&sig=abc"
            }
        },
        "steps": steps
    })
}

fn hosted_document(steps: &[&str]) -> Value {
    json!({
        "backend": {"type": "terraform-cloud", "org": "acme", "workspace": "infra"},
        "secrets": {"terraform-cloud-backend": {"token": "tfc-token"}},
        "steps": steps
    })
}

#[rstest]
#[tokio::test]
async fn deploy_with_object_storage_creates_workspace_and_reads_outputs(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_stdout("* default\n");
    harness.runner.push_success();
    harness.runner.push_success();
    harness.runner.push_success();
    harness.runner.push_success();
    harness
        .runner
        .push_stdout(json_outputs(&[("endpoint", "https://svc", false)]));

    let report = harness
        .execute(&object_storage_document(&["deploy"]))
        .await
        .expect("deploy succeeds");

    assert_eq!(
        harness.commands(),
        vec![
            "init",
            "workspace list",
            "workspace new run123",
            "workspace select run123",
            "plan",
            "apply",
            "output",
        ]
    );
    let invocations = harness.runner.invocations();
    assert!(invocations[0].has_arg("-backend-config=storage_account_name=acct"));
    assert!(invocations[0].has_arg("-backend-config=container_name=tfstate"));
    assert!(invocations[0].has_arg("-backend-config=key=prod.tfstate"));
    assert!(invocations[0].has_arg("-backend-config=sas_token=sv=2020&sig=abc"));
    assert!(invocations[4].has_arg("-var=id=run123"));
    assert!(invocations[4].has_arg("-var=location=westeurope"));
    assert_eq!(invocations[4].context.env.get("ARM_CLIENT_ID"), Some("cid"));
    assert_eq!(report.step, Some(Step::Deploy));
    assert_eq!(report.backend, BackendKind::ObjectStorage);
    assert_eq!(
        report
            .output
            .as_ref()
            .and_then(|output| output.get("endpoint"))
            .map(crate::terraform::OutputValue::render),
        Some(String::from("https://svc"))
    );
    assert!(harness.transport.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn destroy_with_hosted_backend_deletes_workspace_without_patch(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_success();

    let report = harness
        .execute(&hosted_document(&["destroy"]))
        .await
        .expect("destroy succeeds");

    assert_eq!(harness.commands(), vec!["init", "destroy"]);
    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, ApiMethod::Delete);
    assert_eq!(
        requests[0].url,
        "https://app.terraform.io/api/v2/organizations/acme/workspaces/infra"
    );
    assert_eq!(
        harness.runner.invocations()[0]
            .context
            .env
            .get("TF_TOKEN_app_terraform_io"),
        Some("tfc-token")
    );
    assert!(report.output.is_none());
}

#[rstest]
#[tokio::test]
async fn deploy_with_hosted_backend_disables_remote_operations_first(harness: Harness) {
    for _ in 0..3 {
        harness.runner.push_success();
    }
    harness.runner.push_stdout("{}");

    harness
        .execute(&hosted_document(&["deploy"]))
        .await
        .expect("deploy succeeds");

    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, ApiMethod::Patch);
    assert_eq!(harness.commands(), vec!["init", "plan", "apply", "output"]);
}

#[rstest]
#[tokio::test]
async fn destroy_with_object_storage_switches_to_default_before_delete(harness: Harness) {
    for _ in 0..5 {
        harness.runner.push_success();
    }

    harness
        .execute(&object_storage_document(&["destroy"]))
        .await
        .expect("destroy succeeds");

    assert_eq!(
        harness.commands(),
        vec![
            "init",
            "workspace select run123",
            "destroy",
            "workspace select default",
            "workspace delete run123",
        ]
    );
}

#[rstest]
#[tokio::test]
async fn failed_destroy_keeps_the_workspace(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_failure(1);

    let err = harness
        .execute(&hosted_document(&["destroy"]))
        .await
        .expect_err("destroy fails");

    assert!(matches!(
        err,
        RunError::Provisioning(ProvisioningError::CommandFailed { ref subcommand, .. })
            if subcommand == "destroy"
    ));
    assert!(harness.transport.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn deploy_wins_when_both_steps_are_requested(harness: Harness) {
    for _ in 0..3 {
        harness.runner.push_success();
    }
    harness.runner.push_stdout("{}");

    let report = harness
        .execute(&hosted_document(&["destroy", "deploy"]))
        .await
        .expect("deploy succeeds");

    assert_eq!(report.step, Some(Step::Deploy));
    assert!(!harness.commands().contains(&String::from("destroy")));
}

#[rstest]
#[tokio::test]
async fn no_steps_only_prepares_the_workspace(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_stdout("* default\n  run123\n");
    harness.runner.push_success();

    let report = harness
        .execute(&object_storage_document(&[]))
        .await
        .expect("run succeeds");

    assert_eq!(
        harness.commands(),
        vec!["init", "workspace list", "workspace select run123"]
    );
    assert_eq!(report.step, None);
    assert!(report.output.is_none());
}

#[rstest]
#[tokio::test]
async fn local_backend_runs_without_backend_settings(harness: Harness) {
    for _ in 0..3 {
        harness.runner.push_success();
    }
    harness.runner.push_stdout("{}");

    let report = harness
        .execute(&json!({"steps": ["deploy"]}))
        .await
        .expect("deploy succeeds");

    assert_eq!(report.backend, BackendKind::Local);
    assert_eq!(harness.commands(), vec!["init", "plan", "apply", "output"]);
    assert!(
        !harness.runner.invocations()[0]
            .args
            .iter()
            .any(|arg| arg.to_string_lossy().starts_with("-backend-config"))
    );
}

#[rstest]
#[tokio::test]
async fn hooks_bracket_the_run(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_success();
    harness.runner.push_success();
    harness.runner.push_success();
    let mut document = hosted_document(&["destroy"]);
    document["script"] = json!({
        "prepare": "echo prepare",
        "cleanup": "echo cleanup",
        "env": {"STAGE": "ci"}
    });

    harness.execute(&document).await.expect("run succeeds");

    assert_eq!(
        harness.commands(),
        vec!["sh -c echo prepare", "init", "destroy", "sh -c echo cleanup"]
    );
    let invocations = harness.runner.invocations();
    assert_eq!(invocations[0].context.env.get("STAGE"), Some("ci"));
    assert_eq!(
        invocations[0].context.working_dir.as_ref(),
        Some(&harness.working_dir())
    );
}

#[rstest]
#[tokio::test]
async fn failing_prepare_stops_before_terraform(harness: Harness) {
    harness.runner.push_failure(1);
    let mut document = hosted_document(&["deploy"]);
    document["script"] = json!({"prepare": "exit 1", "cleanup": "echo cleanup"});

    let err = harness.execute(&document).await.expect_err("prepare fails");

    assert!(matches!(err, RunError::Hook(_)));
    assert_eq!(harness.commands(), vec!["sh -c exit 1"]);
    assert!(harness.transport.requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn cleanup_runs_after_failed_deploy(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_failure(1);
    harness.runner.push_success();
    let mut document = hosted_document(&["deploy"]);
    document["script"] = json!({"cleanup": "echo cleanup"});

    let err = harness.execute(&document).await.expect_err("plan fails");

    assert!(matches!(
        err,
        RunError::Provisioning(ProvisioningError::CommandFailed { ref subcommand, .. })
            if subcommand == "plan"
    ));
    assert_eq!(
        harness.commands(),
        vec!["init", "plan", "sh -c echo cleanup"]
    );
}

#[rstest]
#[tokio::test]
async fn cleanup_failure_after_failed_run_keeps_primary_error(harness: Harness) {
    harness.runner.push_failure(1);
    harness.runner.push_failure(7);
    let mut document = hosted_document(&["deploy"]);
    document["script"] = json!({"cleanup": "false"});

    let err = harness.execute(&document).await.expect_err("run fails");

    let RunError::CleanupAfterFailure { primary, cleanup } = err else {
        panic!("expected the cleanup failure to be reported with the primary error");
    };
    assert!(matches!(*primary, RunError::Provisioning(_)));
    assert!(matches!(cleanup, HookError::Failed { ref status, .. } if status == "7"));
}

#[rstest]
#[tokio::test]
async fn cleanup_failure_after_success_fails_the_run(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_success();
    harness.runner.push_failure(2);
    let mut document = hosted_document(&["destroy"]);
    document["script"] = json!({"cleanup": "false"});

    let err = harness.execute(&document).await.expect_err("cleanup fails");

    assert!(matches!(err, RunError::Hook(HookError::Failed { .. })));
}

#[rstest]
#[tokio::test]
async fn hosted_api_failure_stops_before_plan(harness: Harness) {
    harness.runner.push_success();
    harness.transport.push_response(401, "unauthorized");

    let err = harness
        .execute(&hosted_document(&["deploy"]))
        .await
        .expect_err("PATCH fails");

    assert!(matches!(
        err,
        RunError::Backend(BackendError::Api { status: 401, .. })
    ));
    assert_eq!(harness.commands(), vec!["init"]);
}

#[rstest]
#[tokio::test]
async fn missing_backend_secret_fails_before_any_process(harness: Harness) {
    let err = harness
        .execute(&json!({
            "backend": {"type": "azurerm", "key": "k"},
            "steps": ["deploy"]
        }))
        .await
        .expect_err("secrets missing");

    assert!(matches!(
        err,
        RunError::Config(ConfigError::MissingSecret { ref scope, .. }) if scope == "azurerm-backend"
    ));
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_working_dir_fails_before_any_process(harness: Harness) {
    fs::remove_dir(harness.working_dir()).expect("remove working dir");

    let err = harness
        .execute(&hosted_document(&["deploy"]))
        .await
        .expect_err("no working dir");

    assert!(matches!(
        err,
        RunError::Config(ConfigError::MissingPath { ref field, .. }) if field == "workspace"
    ));
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
#[tokio::test]
async fn deploy_runs_compliance_suites_with_outputs(harness: Harness) {
    let tests_path = harness.root.join("suites");
    fs::create_dir_all(tests_path.join("iam")).expect("suite");
    fs::create_dir_all(tests_path.join("network")).expect("suite");
    for _ in 0..3 {
        harness.runner.push_success();
    }
    harness.runner.push_stdout(json_outputs(&[
        ("gcp_project_id", "proj-42", false),
        ("gcp_project_service_account", "{}", true),
    ]));
    harness.runner.push_output(Some(0), "ok", "");
    harness.runner.push_output(Some(100), "", "control failed");
    let mut document = hosted_document(&["deploy"]);
    document["tests_path"] = json!(tests_path.as_str());

    let report = harness.execute(&document).await.expect("deploy succeeds");

    let verdicts: Vec<_> = report
        .tests
        .iter()
        .map(|suite| (suite.name.as_str(), suite.verdict))
        .collect();
    assert_eq!(
        verdicts,
        vec![
            ("iam", SuiteVerdict::Pass),
            ("network", SuiteVerdict::Fail { code: Some(100) }),
        ]
    );
    assert_eq!(report.failed_suites().count(), 1);
    assert!(tests_path.join("network").join("network_result.log").is_file());
    assert!(!harness.root.join("creds.json").exists());
}

#[rstest]
#[tokio::test]
async fn missing_tests_path_fails_before_any_process(harness: Harness) {
    let mut document = hosted_document(&["deploy"]);
    document["tests_path"] = json!(harness.root.join("absent").as_str());

    let err = harness.execute(&document).await.expect_err("no tests dir");

    assert!(matches!(
        err,
        RunError::Config(ConfigError::MissingPath { ref field, .. }) if field == "tests_path"
    ));
    assert!(harness.runner.invocations().is_empty());
}
