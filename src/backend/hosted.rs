//! Hosted workspace (`terraform-cloud`) state backend.
//!
//! State lives in a pre-existing hosted workspace. Before a deploy the
//! workspace's remote operations are switched off so that plan and apply run
//! locally; after a destroy the workspace resource itself is deleted.

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::info;

use super::{
    ApiMethod, ApiRequest, ApiResponse, BackendError, BackendFuture, BackendInitConfig,
    BackendKind, StateBackend, WorkspaceTransport,
};
use crate::config::{ConfigError, HostedWorkspaceConfig, RunId};
use crate::environment::HOSTED_BACKEND_SCOPE;
use crate::runner::CommandRunner;
use crate::secrets::Secrets;
use crate::terraform::TerraformSession;

/// Body of the request that disables remote operations on a workspace.
#[must_use]
pub fn disable_remote_operations_body() -> Value {
    json!({
        "data": {
            "type": "workspaces",
            "attributes": { "operations": false }
        }
    })
}

/// Backend driving a hosted workspace through its HTTP API.
#[derive(Debug)]
pub struct HostedWorkspaceBackend<T> {
    config: HostedWorkspaceConfig,
    token: SecretString,
    transport: T,
}

impl<T: WorkspaceTransport> HostedWorkspaceBackend<T> {
    /// Reads the API token from the `terraform-cloud-backend` secrets scope.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when the token is absent or
    /// blank.
    pub fn new(
        config: HostedWorkspaceConfig,
        secrets: &Secrets,
        transport: T,
    ) -> Result<Self, ConfigError> {
        let token = secrets.require(HOSTED_BACKEND_SCOPE, "token")?;
        Ok(Self {
            config,
            token: SecretString::from(token.expose_secret().to_owned()),
            transport,
        })
    }

    /// URL of the workspace resource.
    #[must_use]
    pub fn workspace_url(&self) -> String {
        format!(
            "https://{}/api/v2/organizations/{}/workspaces/{}",
            self.config.hostname, self.config.organization, self.config.workspace
        )
    }

    async fn send(
        &self,
        method: ApiMethod,
        body: Option<Value>,
    ) -> Result<ApiResponse, BackendError> {
        let request = ApiRequest::new(method, self.workspace_url(), &self.token, body);
        let response = self.transport.send(&request).await?;
        info!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            "hosted workspace request"
        );
        if response.is_success() {
            return Ok(response);
        }
        Err(BackendError::Api {
            method,
            url: request.url,
            status: response.status,
            body: response.body,
        })
    }
}

impl<T: WorkspaceTransport> StateBackend for HostedWorkspaceBackend<T> {
    fn kind(&self) -> BackendKind {
        BackendKind::HostedWorkspace
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
            self.send(ApiMethod::Patch, Some(disable_remote_operations_body()))
                .await?;
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
        Box::pin(async move {
            self.send(ApiMethod::Delete, None).await?;
            info!(workspace = %self.config.workspace, "hosted workspace deleted");
            Ok(())
        })
    }
}
