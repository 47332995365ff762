//! Terraform session: a state machine over one working directory and one
//! parameter set.
//!
//! Every operation is a blocking `terraform` child process run in the working
//! directory with the session's credential environment. Operations called
//! out of order fail with [`ProvisioningError::InvalidState`] before any
//! process is spawned, and a failed invocation leaves the session in
//! [`SessionState::Failed`]. Nothing is retried.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::BackendInitConfig;
use crate::environment::ProcessEnvironment;
use crate::runner::{CommandOutput, CommandRunner, InvocationContext, OutputMode};

mod error;
mod output;
mod workspace;

pub use error::ProvisioningError;
pub use output::{DeploymentOutput, OutputValue};
pub use workspace::WorkspaceList;

/// Workspace Terraform always provides and never deletes.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Lifecycle position of a [`TerraformSession`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// `init` has not run yet.
    Uninitialized,
    /// `init` succeeded; no run workspace is selected.
    Initialized,
    /// The run's workspace is selected.
    WorkspaceSelected,
    /// A plan was saved and may be applied.
    Planned,
    /// The saved plan was applied; outputs are available.
    Applied,
    /// Resources were destroyed.
    Destroyed,
    /// A Terraform invocation failed; the session is unusable.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::WorkspaceSelected => "workspace-selected",
            Self::Planned => "planned",
            Self::Applied => "applied",
            Self::Destroyed => "destroyed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Runtime handle for one run against one Terraform working directory.
#[derive(Debug)]
pub struct TerraformSession<R: CommandRunner> {
    runner: R,
    terraform_bin: String,
    working_dir: Utf8PathBuf,
    variables: BTreeMap<String, Value>,
    context: InvocationContext,
    plan_file: String,
    state: SessionState,
}

impl<R: CommandRunner> TerraformSession<R> {
    /// Creates an uninitialised session.
    #[must_use]
    pub fn new(
        runner: R,
        terraform_bin: impl Into<String>,
        working_dir: &Utf8Path,
        variables: BTreeMap<String, Value>,
        env: ProcessEnvironment,
    ) -> Self {
        Self {
            runner,
            terraform_bin: terraform_bin.into(),
            working_dir: working_dir.to_path_buf(),
            variables,
            context: InvocationContext::in_dir(working_dir, env),
            plan_file: format!("mct-{}.tfplan", Uuid::new_v4().simple()),
            state: SessionState::Uninitialized,
        }
    }

    /// Current lifecycle position.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Working directory holding the Terraform configuration.
    #[must_use]
    pub fn working_dir(&self) -> &Utf8Path {
        &self.working_dir
    }

    /// Name of the saved plan file inside the working directory.
    #[must_use]
    pub fn plan_file(&self) -> &str {
        &self.plan_file
    }

    /// Runs `terraform init`, passing each backend setting as
    /// `-backend-config=key=value`. An empty config keeps the backend block
    /// of the configuration (or the local default).
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] unless the session is
    /// uninitialised, or [`ProvisioningError::CommandFailed`] when init fails.
    pub fn init(&mut self, backend: &BackendInitConfig) -> Result<(), ProvisioningError> {
        self.require("init", |state| state == SessionState::Uninitialized)?;

        let mut args = base_args("init");
        args.push(OsString::from("-reconfigure"));
        for (key, value) in backend.iter() {
            args.push(OsString::from(format!(
                "-backend-config={key}={}",
                value.expose_secret()
            )));
        }

        self.invoke("init", &args)?;
        self.state = SessionState::Initialized;
        info!(working_dir = %self.working_dir, backend_settings = backend.len(), "terraform initialised");
        Ok(())
    }

    /// Lists the backend's workspaces.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] before `init`, or
    /// [`ProvisioningError::CommandFailed`] when the listing fails.
    pub fn list_workspaces(&mut self) -> Result<WorkspaceList, ProvisioningError> {
        self.require("workspace list", is_initialized)?;
        let output = self.invoke_with(
            "workspace list",
            &[OsString::from("workspace"), OsString::from("list")],
            OutputMode::Capture,
        )?;
        Ok(WorkspaceList::parse(&output.stdout))
    }

    /// Creates workspace `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] before `init`, or
    /// [`ProvisioningError::CommandFailed`] when creation fails.
    pub fn new_workspace(&mut self, name: &str) -> Result<(), ProvisioningError> {
        self.require("workspace new", is_initialized)?;
        self.invoke("workspace new", &workspace_args("new", name))?;
        info!(workspace = name, "workspace created");
        Ok(())
    }

    /// Selects workspace `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] before `init`, or
    /// [`ProvisioningError::CommandFailed`] when selection fails.
    pub fn select_workspace(&mut self, name: &str) -> Result<(), ProvisioningError> {
        self.require("workspace select", is_initialized)?;
        self.invoke("workspace select", &workspace_args("select", name))?;
        self.mark_workspace_selected();
        debug!(workspace = name, "workspace selected");
        Ok(())
    }

    /// Deletes workspace `name`. Terraform refuses to delete the selected
    /// workspace, so callers switch to [`DEFAULT_WORKSPACE`] first.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] before `init`, or
    /// [`ProvisioningError::CommandFailed`] when deletion fails.
    pub fn delete_workspace(&mut self, name: &str) -> Result<(), ProvisioningError> {
        self.require("workspace delete", is_initialized)?;
        self.invoke("workspace delete", &workspace_args("delete", name))?;
        info!(workspace = name, "workspace deleted");
        Ok(())
    }

    /// Records that the run's state location is ready, for backends without
    /// workspace semantics. Later states are left as they are.
    pub fn mark_workspace_selected(&mut self) {
        if self.state == SessionState::Initialized {
            self.state = SessionState::WorkspaceSelected;
        }
    }

    /// Saves a plan for the session's variables.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] unless a workspace is
    /// selected, or [`ProvisioningError::CommandFailed`] when planning fails.
    pub fn plan(&mut self) -> Result<(), ProvisioningError> {
        self.require("plan", |state| {
            matches!(state, SessionState::WorkspaceSelected | SessionState::Planned)
        })?;

        let mut args = base_args("plan");
        args.push(OsString::from(format!("-out={}", self.plan_file)));
        args.extend(self.variable_args());

        if let Err(err) = self.invoke("plan", &args) {
            self.discard_plan_file();
            return Err(err);
        }
        self.state = SessionState::Planned;
        info!(plan_file = %self.plan_file, "plan saved");
        Ok(())
    }

    /// Applies the saved plan without planning again or prompting.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] unless a plan was saved in
    /// this session, or [`ProvisioningError::CommandFailed`] when apply fails.
    pub fn apply(&mut self) -> Result<(), ProvisioningError> {
        self.require("apply", |state| state == SessionState::Planned)?;

        let mut args = base_args("apply");
        args.push(OsString::from("-auto-approve"));
        args.push(OsString::from(&self.plan_file));

        let applied = self.invoke("apply", &args);
        self.discard_plan_file();
        applied?;
        self.state = SessionState::Applied;
        info!("apply complete");
        Ok(())
    }

    /// Destroys every resource tracked in the selected workspace.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] unless a workspace is
    /// selected, or [`ProvisioningError::CommandFailed`] when destroy fails.
    pub fn destroy(&mut self) -> Result<(), ProvisioningError> {
        self.require("destroy", |state| state == SessionState::WorkspaceSelected)?;

        let mut args = base_args("destroy");
        args.push(OsString::from("-auto-approve"));
        args.extend(self.variable_args());

        self.invoke("destroy", &args)?;
        self.state = SessionState::Destroyed;
        info!("destroy complete");
        Ok(())
    }

    /// Reads the outputs of the applied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisioningError::InvalidState`] unless apply succeeded in
    /// this session, [`ProvisioningError::CommandFailed`] when the command
    /// fails, or [`ProvisioningError::Output`] for unparsable output.
    pub fn output(&mut self) -> Result<DeploymentOutput, ProvisioningError> {
        self.require("output", |state| state == SessionState::Applied)?;

        let output = self.invoke_with(
            "output",
            &[
                OsString::from("output"),
                OsString::from("-no-color"),
                OsString::from("-json"),
            ],
            OutputMode::Capture,
        )?;
        DeploymentOutput::from_json(&output.stdout).map_err(|err| ProvisioningError::Output {
            message: err.to_string(),
        })
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: impl Fn(SessionState) -> bool,
    ) -> Result<(), ProvisioningError> {
        if allowed(self.state) {
            return Ok(());
        }
        Err(ProvisioningError::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn invoke(
        &mut self,
        subcommand: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ProvisioningError> {
        self.invoke_with(subcommand, args, OutputMode::Forward)
    }

    fn invoke_with(
        &mut self,
        subcommand: &str,
        args: &[OsString],
        mode: OutputMode,
    ) -> Result<CommandOutput, ProvisioningError> {
        debug!(
            subcommand,
            working_dir = %self.working_dir,
            env = ?self.context.env,
            "running terraform"
        );
        let result = match mode {
            OutputMode::Forward => self.runner.run(&self.terraform_bin, args, &self.context),
            OutputMode::Capture => {
                self.runner
                    .run(&self.terraform_bin, args, &self.context.captured())
            }
        };
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                self.state = SessionState::Failed;
                return Err(err.into());
            }
        };

        if output.is_success() {
            return Ok(output);
        }

        self.state = SessionState::Failed;
        Err(ProvisioningError::CommandFailed {
            subcommand: subcommand.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn variable_args(&self) -> impl Iterator<Item = OsString> + '_ {
        self.variables.iter().map(|(name, value)| {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            OsString::from(format!("-var={name}={rendered}"))
        })
    }

    fn discard_plan_file(&self) {
        let removed = Dir::open_ambient_dir(&self.working_dir, ambient_authority())
            .and_then(|dir| dir.remove_file(&self.plan_file));
        if let Err(err) = removed {
            debug!(plan_file = %self.plan_file, error = %err, "plan file not removed");
        }
    }
}

impl<R: CommandRunner> Drop for TerraformSession<R> {
    fn drop(&mut self) {
        if self.state == SessionState::Planned {
            self.discard_plan_file();
        }
    }
}

const fn is_initialized(state: SessionState) -> bool {
    !matches!(state, SessionState::Uninitialized | SessionState::Failed)
}

fn base_args(subcommand: &str) -> Vec<OsString> {
    vec![
        OsString::from(subcommand),
        OsString::from("-input=false"),
        OsString::from("-no-color"),
    ]
}

fn workspace_args(action: &str, name: &str) -> Vec<OsString> {
    vec![
        OsString::from("workspace"),
        OsString::from(action),
        OsString::from(name),
    ]
}
