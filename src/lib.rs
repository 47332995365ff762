//! Core library for `mct`, the infrastructure lifecycle runner.
//!
//! A run takes a fully-resolved configuration document and drives Terraform
//! through backend registration, workspace management and the deploy or
//! destroy branch, optionally followed by InSpec compliance suites against
//! the fresh deployment. External tools are reached through the
//! [`CommandRunner`] seam and the hosted workspace API through
//! [`WorkspaceTransport`], so the whole lifecycle can be driven by fakes.

pub mod backend;
pub mod compliance;
pub mod config;
pub mod environment;
pub mod hooks;
pub mod orchestrator;
pub mod runner;
pub mod secrets;
pub mod terraform;
pub mod test_support;

pub use backend::{
    BackendError, BackendKind, ConfiguredBackend, HostedWorkspaceBackend, LocalBackend,
    ObjectStorageBackend, ReqwestTransport, StateBackend, WorkspaceTransport,
};
pub use compliance::{ComplianceError, ComplianceRunner, ComplianceSettings, SuiteResult, SuiteVerdict};
pub use config::{ConfigError, ResolvedConfiguration, RunId, RunnerConfig, Step, Steps};
pub use environment::{ProcessEnvironment, configure_environment};
pub use hooks::{HookError, ScriptHooks};
pub use orchestrator::{Orchestrator, RunError, RunReport};
pub use runner::{
    CommandOutput, CommandRunner, InvocationContext, OutputMode, ProcessCommandRunner, RunnerError,
    StreamingCommandRunner,
};
pub use secrets::Secrets;
pub use terraform::{DeploymentOutput, ProvisioningError, SessionState, TerraformSession};
