//! Configuration for a run: tool settings layered via `ortho-config`, and the
//! fully-resolved run document produced by the configuration collaborator.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

mod resolved;

pub use resolved::{
    BackendConfig, DEFAULT_HOSTED_HOSTNAME, HostedWorkspaceConfig, ObjectStorageConfig,
    ResolvedConfiguration, RunId, ScriptConfig, Step, Steps, require_directory, require_file,
};

/// Default location of the credentials file written for the compliance
/// runner.
pub const DEFAULT_CREDENTIALS_PATH: &str = "/tmp/mct/inspec_gcp_secret.json";

/// Tool locations and compliance defaults, merged from defaults,
/// `mct.toml`, and `MCT_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MCT",
    discovery(
        app_name = "mct",
        env_var = "MCT_CONFIG_PATH",
        config_file_name = "mct.toml",
        dotfile_name = ".mct.toml",
        project_file_name = "mct.toml"
    )
)]
pub struct RunnerConfig {
    /// Path to the `terraform` executable.
    #[ortho_config(default = "terraform".to_owned())]
    pub terraform_bin: String,
    /// Path to the `inspec` executable used for compliance suites.
    #[ortho_config(default = "inspec".to_owned())]
    pub inspec_bin: String,
    /// Shell used to execute prepare and cleanup scripts.
    #[ortho_config(default = "sh".to_owned())]
    pub shell_bin: String,
    /// InSpec target URI passed with `-t`.
    #[ortho_config(default = "gcp://".to_owned())]
    pub inspec_target: String,
    /// Where the service-account credentials from the deployment output are
    /// written before the compliance suites run.
    #[ortho_config(default = DEFAULT_CREDENTIALS_PATH.to_owned())]
    pub credentials_path: String,
    /// Deployment output holding the service-account credentials.
    #[ortho_config(default = "gcp_project_service_account".to_owned())]
    pub credentials_output: String,
    /// Deployment output holding the project identifier.
    #[ortho_config(default = "gcp_project_id".to_owned())]
    pub project_output: String,
}

impl RunnerConfig {
    /// Loads settings without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails, or
    /// [`ConfigError::MissingField`] when a merged value is blank.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([OsString::from("mct")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Ensures every setting is present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and `mct.toml` key for the first blank setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, key) in [
            (&self.terraform_bin, "terraform_bin"),
            (&self.inspec_bin, "inspec_bin"),
            (&self.shell_bin, "shell_bin"),
            (&self.inspec_target, "inspec_target"),
            (&self.credentials_path, "credentials_path"),
            (&self.credentials_output, "credentials_output"),
            (&self.project_output, "project_output"),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "{key}: set MCT_{} or add {key} to mct.toml",
                    key.to_uppercase()
                )));
            }
        }
        Ok(())
    }
}

impl RunnerConfig {
    /// Settings with every field at its built-in default, bypassing file and
    /// environment discovery.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            terraform_bin: String::from("terraform"),
            inspec_bin: String::from("inspec"),
            shell_bin: String::from("sh"),
            inspec_target: String::from("gcp://"),
            credentials_path: String::from(DEFAULT_CREDENTIALS_PATH),
            credentials_output: String::from("gcp_project_service_account"),
            project_output: String::from("gcp_project_id"),
        }
    }
}

/// Errors raised during configuration loading and validation. All of them
/// are raised before any external process starts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field is present but holds an unusable value.
    #[error("invalid configuration field {field}: {message}")]
    InvalidField {
        /// Dotted path of the offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Raised when the backend `type` is not one this runner drives.
    #[error("unsupported backend type '{kind}' (expected azurerm or terraform-cloud)")]
    UnsupportedBackend {
        /// Backend type found in the document.
        kind: String,
    },
    /// Raised when a secrets scope lacks a field the run needs.
    #[error("missing secret {scope}.{field}")]
    MissingSecret {
        /// Secrets scope that was consulted.
        scope: String,
        /// Field expected inside the scope.
        field: String,
    },
    /// Raised when a path given to the runner does not exist.
    #[error("{field} does not exist: {path}")]
    MissingPath {
        /// Name of the parameter that carried the path.
        field: String,
        /// Path that was checked.
        path: String,
    },
    /// Raised when a configuration file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File that failed to load.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader or the JSON parser.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
