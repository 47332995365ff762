//! Remote-state backends behind one capability set.
//!
//! A run uses exactly one backend, selected once from the resolved
//! configuration as a [`ConfiguredBackend`] variant:
//!
//! - [`ObjectStorageBackend`] passes storage settings to `terraform init` and
//!   manages a Terraform workspace named after the run.
//! - [`HostedWorkspaceBackend`] talks to the hosted workspace API, switching
//!   remote operations off before a deploy and deleting the workspace
//!   resource after a destroy.
//! - [`LocalBackend`] keeps Terraform's local default and has no workspace
//!   semantics.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use secrecy::SecretString;
use thiserror::Error;

use crate::config::{BackendConfig, ConfigError, RunId};
use crate::runner::CommandRunner;
use crate::secrets::Secrets;
use crate::terraform::{ProvisioningError, TerraformSession};

mod hosted;
mod object_storage;
mod transport;

pub use hosted::{HostedWorkspaceBackend, disable_remote_operations_body};
pub use object_storage::{OBJECT_STORAGE_SCOPE, ObjectStorageBackend};
pub use transport::{
    ApiMethod, ApiRequest, ApiResponse, JSON_API_CONTENT_TYPE, ReqwestTransport,
    WorkspaceTransport,
};

/// Future returned by backend operations. Runs are single-threaded, so the
/// future is not required to be `Send`.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + 'a>>;

/// Which backend a run uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BackendKind {
    /// Terraform's local default state.
    Local,
    /// Object-storage state (`azurerm`).
    ObjectStorage,
    /// Hosted workspace state (`terraform-cloud`).
    HostedWorkspace,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::ObjectStorage => "azurerm",
            Self::HostedWorkspace => "terraform-cloud",
        })
    }
}

/// Settings passed to `terraform init` as `-backend-config` pairs.
///
/// Values are secrets; `Debug` shows keys only.
#[derive(Debug, Default)]
pub struct BackendInitConfig {
    settings: BTreeMap<String, SecretString>,
}

impl BackendInitConfig {
    /// Creates an empty config, which keeps Terraform's configured backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one setting.
    pub fn insert(&mut self, key: impl Into<String>, value: SecretString) {
        self.settings.insert(key.into(), value);
    }

    /// Looks up a setting.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.settings.get(key)
    }

    /// Iterates over the settings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SecretString)> {
        self.settings.iter()
    }

    /// Setting names in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.settings.keys().map(String::as_str)
    }

    /// Number of settings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.settings.len()
    }

    /// Returns `true` when there is nothing to pass to `init`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

/// Errors raised by backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when the hosted workspace API answers with a non-2xx status.
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Api {
        /// Request method.
        method: ApiMethod,
        /// Request URL.
        url: String,
        /// Status code returned by the service.
        status: u16,
        /// Response body, verbatim.
        body: String,
    },
    /// Raised when the hosted workspace API cannot be reached.
    #[error("hosted workspace request failed: {message}")]
    Transport {
        /// Transport error message.
        message: String,
    },
    /// Raised when a Terraform workspace command fails.
    #[error(transparent)]
    Workspace(#[from] ProvisioningError),
}

/// Capability set shared by all backends.
pub trait StateBackend {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Produces the `terraform init` backend settings. Backends without
    /// local settings return an empty config.
    fn register(&self) -> BackendInitConfig;

    /// Makes the run's workspace exist and selects it. Calling this again for
    /// the same run reuses the workspace.
    fn ensure_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a;

    /// Selects the run's existing workspace.
    fn select_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a;

    /// Deletes the run's workspace. Only called after a successful destroy.
    fn delete_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a;
}

/// Terraform's local default backend. Workspace operations only advance the
/// session.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalBackend;

impl StateBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn register(&self) -> BackendInitConfig {
        BackendInitConfig::new()
    }

    fn ensure_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        _run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        Box::pin(async move {
            session.mark_workspace_selected();
            Ok(())
        })
    }

    fn select_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        _run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        Box::pin(async move {
            session.mark_workspace_selected();
            Ok(())
        })
    }

    fn delete_workspace<'a, R>(
        &'a self,
        _session: &'a mut TerraformSession<R>,
        _run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        Box::pin(async move { Ok(()) })
    }
}

/// The backend selected for a run.
#[derive(Debug)]
pub enum ConfiguredBackend<T> {
    /// No backend section: local state.
    Local(LocalBackend),
    /// Object-storage state.
    ObjectStorage(ObjectStorageBackend),
    /// Hosted workspace state.
    HostedWorkspace(HostedWorkspaceBackend<T>),
}

impl<T: WorkspaceTransport> ConfiguredBackend<T> {
    /// Selects and builds the backend named by `backend`, reading only the
    /// secrets that backend needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when the backend's secrets
    /// scope is incomplete.
    pub fn from_config(
        backend: Option<&BackendConfig>,
        secrets: &Secrets,
        transport: T,
    ) -> Result<Self, ConfigError> {
        match backend {
            None => Ok(Self::Local(LocalBackend)),
            Some(BackendConfig::ObjectStorage(config)) => Ok(Self::ObjectStorage(
                ObjectStorageBackend::new(config, secrets)?,
            )),
            Some(BackendConfig::HostedWorkspace(config)) => Ok(Self::HostedWorkspace(
                HostedWorkspaceBackend::new(config.clone(), secrets, transport)?,
            )),
        }
    }
}

impl<T: WorkspaceTransport> StateBackend for ConfiguredBackend<T> {
    fn kind(&self) -> BackendKind {
        match self {
            Self::Local(backend) => backend.kind(),
            Self::ObjectStorage(backend) => backend.kind(),
            Self::HostedWorkspace(backend) => backend.kind(),
        }
    }

    fn register(&self) -> BackendInitConfig {
        match self {
            Self::Local(backend) => backend.register(),
            Self::ObjectStorage(backend) => backend.register(),
            Self::HostedWorkspace(backend) => backend.register(),
        }
    }

    fn ensure_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        match self {
            Self::Local(backend) => backend.ensure_workspace(session, run_id),
            Self::ObjectStorage(backend) => backend.ensure_workspace(session, run_id),
            Self::HostedWorkspace(backend) => backend.ensure_workspace(session, run_id),
        }
    }

    fn select_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        match self {
            Self::Local(backend) => backend.select_workspace(session, run_id),
            Self::ObjectStorage(backend) => backend.select_workspace(session, run_id),
            Self::HostedWorkspace(backend) => backend.select_workspace(session, run_id),
        }
    }

    fn delete_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        match self {
            Self::Local(backend) => backend.delete_workspace(session, run_id),
            Self::ObjectStorage(backend) => backend.delete_workspace(session, run_id),
            Self::HostedWorkspace(backend) => backend.delete_workspace(session, run_id),
        }
    }
}
