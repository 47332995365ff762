//! BDD scenarios for the lifecycle orchestrator.

use rstest_bdd_macros::scenario;

use super::test_helpers::{OrchestratorContext, orchestrator_context};

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Deploy with object storage creates the run workspace"
)]
fn scenario_deploy_creates_workspace(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Deploy with object storage reuses an existing workspace"
)]
fn scenario_deploy_reuses_workspace(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Destroy with the hosted backend deletes the workspace resource"
)]
fn scenario_destroy_hosted(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Deploy runs every compliance suite"
)]
fn scenario_compliance_suites(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Cleanup still runs when planning fails"
)]
fn scenario_cleanup_after_failure(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Missing backend secrets stop the run before Terraform starts"
)]
fn scenario_missing_backend_secrets(orchestrator_context: OrchestratorContext) {
    drop(orchestrator_context);
}
