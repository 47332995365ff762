//! Typed view of the fully-resolved run document.
//!
//! The document arrives as JSON with `parameters`, `backend`, `secrets`,
//! `steps`, and optional `script` and `tests_path` sections. The backend
//! section is resolved into a [`BackendConfig`] variant here, so unsupported
//! backend types are rejected before anything else happens.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::ConfigError;
use crate::secrets::Secrets;

/// Host serving the hosted-workspace API when the document names none.
pub const DEFAULT_HOSTED_HOSTNAME: &str = "app.terraform.io";

/// Identifier of one lifecycle run, also used as the workspace name.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RunId(String);

impl RunId {
    /// Validates and wraps a run identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the value is blank and
    /// [`ConfigError::InvalidField`] when it contains whitespace, which
    /// workspace listings cannot represent.
    pub fn new(value: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingField(String::from("id")));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidField {
                field: String::from("id"),
                message: String::from("run identifiers must not contain whitespace"),
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Borrows the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A lifecycle step that may be requested for a run.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Step {
    /// Plan and apply the infrastructure.
    Deploy,
    /// Tear the infrastructure down and delete its workspace.
    Destroy,
}

impl Step {
    /// Name used in documents and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "deploy" => Ok(Self::Deploy),
            "destroy" => Ok(Self::Destroy),
            other => Err(ConfigError::InvalidField {
                field: String::from("steps"),
                message: format!("unknown step '{other}' (expected deploy or destroy)"),
            }),
        }
    }
}

/// Ordered, duplicate-free set of requested steps.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(try_from = "Vec<String>")]
pub struct Steps(Vec<Step>);

impl Steps {
    /// Parses step names, keeping first-seen order and dropping repeats.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] for an unknown step name.
    pub fn parse<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut steps = Vec::new();
        for name in names {
            let step = name.as_ref().parse::<Step>()?;
            if !steps.contains(&step) {
                steps.push(step);
            }
        }
        Ok(Self(steps))
    }

    /// Returns `true` when `step` was requested.
    #[must_use]
    pub fn contains(&self, step: Step) -> bool {
        self.0.contains(&step)
    }

    /// The lifecycle branch this run takes. Deploy and destroy are mutually
    /// exclusive; deploy wins when both are present.
    #[must_use]
    pub fn branch(&self) -> Option<Step> {
        [Step::Deploy, Step::Destroy]
            .into_iter()
            .find(|step| self.contains(*step))
    }

    /// Returns `true` when no step was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the steps in request order.
    pub fn iter(&self) -> impl Iterator<Item = Step> + '_ {
        self.0.iter().copied()
    }
}

impl TryFrom<Vec<String>> for Steps {
    type Error = ConfigError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// State object key for the object-storage backend. Storage account,
/// container, and access token come from the `azurerm-backend` secrets scope.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ObjectStorageConfig {
    /// Object key of the state blob.
    pub key: String,
}

/// Hosted workspace whose remote execution is disabled for the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostedWorkspaceConfig {
    /// Organisation that owns the workspace.
    pub organization: String,
    /// Workspace name within the organisation.
    pub workspace: String,
    /// API host, `app.terraform.io` unless overridden.
    pub hostname: String,
}

/// The remote-state backend selected for a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendConfig {
    /// Object-storage state (`type: azurerm`).
    ObjectStorage(ObjectStorageConfig),
    /// Hosted workspace state (`type: terraform-cloud`).
    HostedWorkspace(HostedWorkspaceConfig),
}

impl BackendConfig {
    fn from_raw(raw: RawBackend) -> Result<Self, ConfigError> {
        match raw.kind.trim() {
            "azurerm" | "object-storage" => Ok(Self::ObjectStorage(ObjectStorageConfig {
                key: required_string(&raw.fields, "key")?,
            })),
            "terraform-cloud" | "hosted-workspace" => {
                let hostname = optional_string(&raw.fields, "hostname")?
                    .unwrap_or_else(|| String::from(DEFAULT_HOSTED_HOSTNAME));
                Ok(Self::HostedWorkspace(HostedWorkspaceConfig {
                    organization: url_safe("org", required_string(&raw.fields, "org")?, is_name_char)?,
                    workspace: url_safe(
                        "workspace",
                        required_string(&raw.fields, "workspace")?,
                        is_name_char,
                    )?,
                    hostname: url_safe("hostname", hostname, is_host_char)?,
                }))
            }
            other => Err(ConfigError::UnsupportedBackend {
                kind: other.to_owned(),
            }),
        }
    }
}

fn optional_string(fields: &Map<String, Value>, name: &str) -> Result<Option<String>, ConfigError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if !value.trim().is_empty() => {
            Ok(Some(value.trim().to_owned()))
        }
        Some(Value::String(_)) => Err(ConfigError::MissingField(format!("backend.{name}"))),
        Some(_) => Err(ConfigError::InvalidField {
            field: format!("backend.{name}"),
            message: String::from("expected a string"),
        }),
    }
}

fn required_string(fields: &Map<String, Value>, name: &str) -> Result<String, ConfigError> {
    optional_string(fields, name)?
        .ok_or_else(|| ConfigError::MissingField(format!("backend.{name}")))
}

/// Accepts `value` only when every character passes `allowed`. Hosted names
/// are placed unescaped in the API URL.
fn url_safe(name: &str, value: String, allowed: fn(char) -> bool) -> Result<String, ConfigError> {
    match value.chars().find(|character| !allowed(*character)) {
        None => Ok(value),
        Some(character) => Err(ConfigError::InvalidField {
            field: format!("backend.{name}"),
            message: format!("'{value}' contains unsupported character {character:?}"),
        }),
    }
}

const fn is_name_char(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.')
}

const fn is_host_char(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '-' | '.' | ':')
}

/// Opaque prepare and cleanup scripts with their environment.
#[derive(Clone, Default, Deserialize, Eq, PartialEq)]
pub struct ScriptConfig {
    /// Script run before any Terraform invocation.
    #[serde(default)]
    pub prepare: Option<String>,
    /// Script run after the lifecycle branch, whether or not it succeeded.
    #[serde(default)]
    pub cleanup: Option<String>,
    /// Variables exported to both scripts.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl fmt::Debug for ScriptConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptConfig")
            .field("prepare", &self.prepare.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Deserialize)]
struct RawBackend {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    parameters: BTreeMap<String, Value>,
    #[serde(default)]
    backend: Option<RawBackend>,
    #[serde(default)]
    secrets: Secrets,
    #[serde(default)]
    steps: Steps,
    #[serde(default)]
    script: Option<ScriptConfig>,
    #[serde(default)]
    tests_path: Option<String>,
}

/// Immutable, fully-resolved view of a run document.
#[derive(Debug, Default)]
pub struct ResolvedConfiguration {
    /// Terraform input variables.
    pub parameters: BTreeMap<String, Value>,
    /// Remote-state backend; `None` uses Terraform's local default.
    pub backend: Option<BackendConfig>,
    /// Credentials scoped by provider or backend.
    pub secrets: Secrets,
    /// Requested lifecycle steps.
    pub steps: Steps,
    /// Optional prepare and cleanup hooks.
    pub script: Option<ScriptConfig>,
    /// Directory of compliance suites run after a deploy.
    pub tests_path: Option<Utf8PathBuf>,
}

impl ResolvedConfiguration {
    /// Parses a resolved document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown steps,
    /// and [`ConfigError::UnsupportedBackend`] or
    /// [`ConfigError::MissingField`] for an unusable backend section.
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawDocument =
            serde_json::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
        let backend = raw.backend.map(BackendConfig::from_raw).transpose()?;

        Ok(Self {
            parameters: raw.parameters,
            backend,
            secrets: raw.secrets,
            steps: raw.steps,
            script: raw.script,
            tests_path: raw
                .tests_path
                .filter(|path| !path.trim().is_empty())
                .map(Utf8PathBuf::from),
        })
    }

    /// Loads the document at `path`, merging an optional separate secrets
    /// document (a JSON object of scopes) over its `secrets` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingPath`] when a file does not exist,
    /// [`ConfigError::Io`] when it cannot be read, and any error from
    /// [`ResolvedConfiguration::from_json_str`].
    pub fn load(path: &Utf8Path, secrets_path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        require_file(path, "config_path")?;
        let mut config = Self::from_json_str(&read_file(path)?)?;

        if let Some(secrets_file) = secrets_path {
            require_file(secrets_file, "secrets_path")?;
            let extra: Secrets = serde_json::from_str(&read_file(secrets_file)?)
                .map_err(|err| ConfigError::Parse(format!("{secrets_file}: {err}")))?;
            config.secrets.merge(extra);
        }

        Ok(config)
    }

    /// Terraform variables for `run_id`: the document parameters with `id`
    /// set to the run identifier.
    #[must_use]
    pub fn parameters_for(&self, run_id: &RunId) -> BTreeMap<String, Value> {
        let mut parameters = self.parameters.clone();
        parameters.insert(String::from("id"), Value::String(run_id.as_str().to_owned()));
        parameters
    }
}

/// Fails unless `path` is an existing directory.
///
/// # Errors
///
/// Returns [`ConfigError::MissingPath`] naming `field`.
pub fn require_directory(path: &Utf8Path, field: &str) -> Result<(), ConfigError> {
    if path.is_dir() {
        return Ok(());
    }
    Err(ConfigError::MissingPath {
        field: field.to_owned(),
        path: path.to_string(),
    })
}

/// Fails unless `path` is an existing regular file.
///
/// # Errors
///
/// Returns [`ConfigError::MissingPath`] naming `field`.
pub fn require_file(path: &Utf8Path, field: &str) -> Result<(), ConfigError> {
    if path.is_file() {
        return Ok(());
    }
    Err(ConfigError::MissingPath {
        field: field.to_owned(),
        path: path.to_string(),
    })
}

fn read_file(path: &Utf8Path) -> Result<String, ConfigError> {
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| ConfigError::Io {
        path: path.to_string(),
        message: String::from("path is missing a filename"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| ConfigError::Io {
        path: parent.to_string(),
        message: err.to_string(),
    })?;

    dir.read_to_string(file_name).map_err(|err| ConfigError::Io {
        path: path.to_string(),
        message: err.to_string(),
    })
}
