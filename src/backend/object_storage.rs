//! Object-storage (`azurerm`) state backend.

use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::{BackendError, BackendFuture, BackendInitConfig, BackendKind, StateBackend};
use crate::config::{ConfigError, ObjectStorageConfig, RunId};
use crate::runner::CommandRunner;
use crate::secrets::Secrets;
use crate::terraform::{DEFAULT_WORKSPACE, TerraformSession};

/// Secrets scope holding the storage account details.
pub const OBJECT_STORAGE_SCOPE: &str = "azurerm-backend";

/// State kept in a storage container, one Terraform workspace per run.
#[derive(Debug)]
pub struct ObjectStorageBackend {
    storage_account_name: SecretString,
    container_name: SecretString,
    sas_token: SecretString,
    key: String,
}

impl ObjectStorageBackend {
    /// Reads the storage account name, container and SAS token from the
    /// `azurerm-backend` secrets scope.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when one of the fields is
    /// absent or blank.
    pub fn new(config: &ObjectStorageConfig, secrets: &Secrets) -> Result<Self, ConfigError> {
        let field = |name: &str| {
            secrets
                .require(OBJECT_STORAGE_SCOPE, name)
                .map(|value| SecretString::from(value.expose_secret().to_owned()))
        };
        Ok(Self {
            storage_account_name: field("storage-account-name")?,
            container_name: field("storage-account-container")?,
            sas_token: field("storage-account-sas")?,
            key: config.key.clone(),
        })
    }

    /// Object key of the state blob.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

fn copy(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}

impl StateBackend for ObjectStorageBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStorage
    }

    fn register(&self) -> BackendInitConfig {
        let mut config = BackendInitConfig::new();
        config.insert("storage_account_name", copy(&self.storage_account_name));
        config.insert("container_name", copy(&self.container_name));
        config.insert("key", SecretString::from(self.key.clone()));
        config.insert("sas_token", copy(&self.sas_token));
        config
    }

    fn ensure_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        Box::pin(async move {
            let workspaces = session.list_workspaces()?;
            if workspaces.contains(run_id.as_str()) {
                info!(workspace = %run_id, "reusing existing workspace");
            } else {
                session.new_workspace(run_id.as_str())?;
            }
            session.select_workspace(run_id.as_str())?;
            Ok(())
        })
    }

    fn select_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        Box::pin(async move {
            session.select_workspace(run_id.as_str())?;
            Ok(())
        })
    }

    fn delete_workspace<'a, R>(
        &'a self,
        session: &'a mut TerraformSession<R>,
        run_id: &'a RunId,
    ) -> BackendFuture<'a, (), BackendError>
    where
        R: CommandRunner + 'a,
    {
        Box::pin(async move {
            session.select_workspace(DEFAULT_WORKSPACE)?;
            session.delete_workspace(run_id.as_str())?;
            Ok(())
        })
    }
}
