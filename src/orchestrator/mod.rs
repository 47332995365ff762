//! Drives one run through the deploy or destroy lifecycle.
//!
//! A run resolves its backend and credential environment, runs the prepare
//! hook, initialises Terraform against the backend, and then takes at most
//! one lifecycle branch. Deploy wins over destroy when both are requested;
//! with neither, the run only prepares the workspace. The cleanup hook runs
//! after the branch whether or not it succeeded.

use camino::Utf8Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::{
    BackendError, BackendKind, ConfiguredBackend, StateBackend, WorkspaceTransport,
};
use crate::compliance::{ComplianceError, ComplianceRunner, ComplianceSettings, SuiteResult, SuiteVerdict};
use crate::config::{
    ConfigError, ResolvedConfiguration, RunId, RunnerConfig, Step, require_directory,
};
use crate::environment::{ProcessEnvironment, configure_environment};
use crate::hooks::{HookError, ScriptHooks};
use crate::runner::CommandRunner;
use crate::terraform::{DeploymentOutput, ProvisioningError, TerraformSession};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Raised when the configuration is unusable. Nothing was started.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when a prepare or cleanup script fails.
    #[error(transparent)]
    Hook(#[from] HookError),
    /// Raised when a Terraform invocation fails or is out of order.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
    /// Raised when the backend cannot prepare or remove the workspace.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// Raised when the compliance phase cannot run at all.
    #[error(transparent)]
    Compliance(#[from] ComplianceError),
    /// Raised when the cleanup script fails after the run already failed.
    /// The original failure comes first.
    #[error("{primary} (cleanup also failed: {cleanup})")]
    CleanupAfterFailure {
        /// Failure of the lifecycle branch.
        primary: Box<RunError>,
        /// Failure of the cleanup script.
        cleanup: HookError,
    },
}

/// What a successful run produced.
#[derive(Debug)]
pub struct RunReport {
    /// Run the report belongs to.
    pub run_id: RunId,
    /// Backend that held the state.
    pub backend: BackendKind,
    /// Lifecycle branch taken; `None` when only the workspace was prepared.
    pub step: Option<Step>,
    /// Outputs of a deploy.
    pub output: Option<DeploymentOutput>,
    /// Compliance suite results of a deploy with a tests path.
    pub tests: Vec<SuiteResult>,
}

impl RunReport {
    /// Suites that did not pass.
    pub fn failed_suites(&self) -> impl Iterator<Item = &SuiteResult> {
        self.tests
            .iter()
            .filter(|suite| suite.verdict != SuiteVerdict::Pass)
    }
}

/// Runs the lifecycle with a command runner and a hosted workspace
/// transport.
#[derive(Debug)]
pub struct Orchestrator<R, T> {
    runner: R,
    transport: T,
    config: RunnerConfig,
}

impl<R, T> Orchestrator<R, T>
where
    R: CommandRunner + Clone,
    T: WorkspaceTransport + Clone,
{
    /// Creates an orchestrator using the given tool settings.
    #[must_use]
    pub const fn new(runner: R, transport: T, config: RunnerConfig) -> Self {
        Self {
            runner,
            transport,
            config,
        }
    }

    /// Executes one run of `resolved` against the Terraform configuration in
    /// `working_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Config`] before anything starts when the working
    /// directory, tests path, backend, or secrets are unusable. Later
    /// failures are returned as the matching variant once the cleanup hook
    /// has run; a cleanup failure on top of an earlier one is reported as
    /// [`RunError::CleanupAfterFailure`].
    pub async fn execute(
        &self,
        resolved: &ResolvedConfiguration,
        run_id: &RunId,
        working_dir: &Utf8Path,
    ) -> Result<RunReport, RunError> {
        let step = resolved.steps.branch();
        require_directory(working_dir, "workspace")?;
        if let (Some(Step::Deploy), Some(tests_path)) = (step, &resolved.tests_path) {
            require_directory(tests_path, "tests_path")?;
        }
        let backend = ConfiguredBackend::from_config(
            resolved.backend.as_ref(),
            &resolved.secrets,
            self.transport.clone(),
        )?;
        let env = configure_environment(&resolved.secrets, resolved.backend.as_ref())?;

        info!(
            run_id = %run_id,
            backend = %backend.kind(),
            step = step.map_or("none", Step::as_str),
            working_dir = %working_dir,
            "starting run"
        );

        let hooks = ScriptHooks::new(
            &self.runner,
            &self.config.shell_bin,
            resolved.script.as_ref(),
            working_dir,
            &env,
        );
        hooks.prepare()?;

        let outcome = self
            .lifecycle(resolved, run_id, working_dir, &backend, &env, step)
            .await;

        match (outcome, hooks.cleanup()) {
            (Ok(report), Ok(())) => {
                info!(run_id = %run_id, "run finished");
                Ok(report)
            }
            (Ok(_), Err(cleanup)) => Err(RunError::Hook(cleanup)),
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(cleanup)) => {
                warn!(error = %cleanup, "cleanup failed after run failure");
                Err(RunError::CleanupAfterFailure {
                    primary: Box::new(primary),
                    cleanup,
                })
            }
        }
    }

    async fn lifecycle(
        &self,
        resolved: &ResolvedConfiguration,
        run_id: &RunId,
        working_dir: &Utf8Path,
        backend: &ConfiguredBackend<T>,
        env: &ProcessEnvironment,
        step: Option<Step>,
    ) -> Result<RunReport, RunError> {
        let mut session = TerraformSession::new(
            self.runner.clone(),
            self.config.terraform_bin.as_str(),
            working_dir,
            resolved.parameters_for(run_id),
            env.clone(),
        );
        session.init(&backend.register())?;

        let mut report = RunReport {
            run_id: run_id.clone(),
            backend: backend.kind(),
            step,
            output: None,
            tests: Vec::new(),
        };

        match step {
            Some(Step::Deploy) => {
                backend.ensure_workspace(&mut session, run_id).await?;
                session.plan()?;
                session.apply()?;
                let output = session.output()?;
                info!(outputs = output.len(), "deployment outputs read");
                if let Some(tests_path) = &resolved.tests_path {
                    let settings = ComplianceSettings::from(&self.config);
                    report.tests =
                        ComplianceRunner::new(&self.runner, &settings).run(tests_path, &output, env)?;
                }
                report.output = Some(output);
            }
            Some(Step::Destroy) => {
                backend.select_workspace(&mut session, run_id).await?;
                session.destroy()?;
                backend.delete_workspace(&mut session, run_id).await?;
            }
            None => {
                backend.ensure_workspace(&mut session, run_id).await?;
                info!(run_id = %run_id, "no lifecycle step requested; workspace prepared");
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
