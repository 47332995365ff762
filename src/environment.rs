//! Maps provider secrets onto the environment variables read by Terraform
//! providers and cloud SDKs.
//!
//! The result is an explicit [`ProcessEnvironment`] handed to each child
//! invocation rather than written into the process-wide environment.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::ExposeSecret;

use crate::config::{BackendConfig, ConfigError};
use crate::secrets::Secrets;

/// Secrets scope holding Azure service principal credentials.
pub const AZURE_SCOPE: &str = "azure";
/// Secrets scope holding the Azure DevOps provider credentials.
pub const AZURE_DEVOPS_SCOPE: &str = "azuredevops";
/// Secrets scope holding the hosted-workspace API token.
pub const HOSTED_BACKEND_SCOPE: &str = "terraform-cloud-backend";

const AZURE_VARIABLES: &[(&str, &str)] = &[
    ("client-id", "ARM_CLIENT_ID"),
    ("client-secret", "ARM_CLIENT_SECRET"),
    ("subscription-id", "ARM_SUBSCRIPTION_ID"),
    ("tenant-id", "ARM_TENANT_ID"),
];

const AZURE_DEVOPS_VARIABLES: &[(&str, &str)] = &[
    ("token", "AZDO_PERSONAL_ACCESS_TOKEN"),
    ("service-url", "AZDO_ORG_SERVICE_URL"),
];

/// Variables layered on top of a child's inherited environment.
///
/// `Debug` prints variable names only; values are usually credentials.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct ProcessEnvironment {
    vars: BTreeMap<String, String>,
}

impl ProcessEnvironment {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an earlier value in this overlay.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Returns the value for `key` when this overlay sets it.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns `true` when the overlay sets `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Iterates over the overlay in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    /// Variable names set by this overlay.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Number of variables in the overlay.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` when the overlay is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Returns a copy of this overlay extended with `other`; `other` wins.
    #[must_use]
    pub fn with(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        merged
            .vars
            .extend(other.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Computes the environment a child would observe when started from
    /// `base`: every inherited variable is kept unless this overlay sets the
    /// same name.
    pub fn overlay<I, K, V>(&self, base: I) -> BTreeMap<String, String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut effective: BTreeMap<String, String> = base
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        effective.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        effective
    }
}

impl fmt::Debug for ProcessEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.vars.keys()).finish()
    }
}

/// Builds the credential environment for the providers present in
/// `secrets` and for the selected backend.
///
/// Provider scopes that are absent contribute nothing. A present scope must
/// carry every field its provider needs.
///
/// # Errors
///
/// Returns [`ConfigError::MissingSecret`] when a present provider scope lacks
/// a required field, or when the hosted-workspace backend is selected without
/// an API token.
pub fn configure_environment(
    secrets: &Secrets,
    backend: Option<&BackendConfig>,
) -> Result<ProcessEnvironment, ConfigError> {
    let mut env = ProcessEnvironment::new();
    map_scope(&mut env, secrets, AZURE_SCOPE, AZURE_VARIABLES)?;
    map_scope(&mut env, secrets, AZURE_DEVOPS_SCOPE, AZURE_DEVOPS_VARIABLES)?;

    if let Some(BackendConfig::HostedWorkspace(hosted)) = backend {
        let token = secrets.require(HOSTED_BACKEND_SCOPE, "token")?;
        env.set(
            cli_token_variable(&hosted.hostname),
            token.expose_secret().to_owned(),
        );
    }

    Ok(env)
}

/// Name of the variable Terraform reads a host's API token from
/// (`TF_TOKEN_app_terraform_io` for `app.terraform.io`).
#[must_use]
pub fn cli_token_variable(hostname: &str) -> String {
    let mut name = String::from("TF_TOKEN_");
    for ch in hostname.chars() {
        match ch {
            '.' => name.push('_'),
            '-' => name.push_str("__"),
            other => name.push(other),
        }
    }
    name
}

fn map_scope(
    env: &mut ProcessEnvironment,
    secrets: &Secrets,
    scope: &str,
    mapping: &[(&str, &str)],
) -> Result<(), ConfigError> {
    if !secrets.has_scope(scope) {
        return Ok(());
    }

    for (field, variable) in mapping {
        let value = secrets.require(scope, field)?;
        env.set(*variable, value.expose_secret().to_owned());
    }
    Ok(())
}
