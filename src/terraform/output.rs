//! Deployment output parsed from `terraform output -json`.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// One named output value.
#[derive(Clone, Deserialize, PartialEq)]
pub struct OutputValue {
    /// Value as reported by Terraform.
    pub value: Value,
    /// Whether Terraform marks the output as sensitive.
    #[serde(default)]
    pub sensitive: bool,
}

impl OutputValue {
    /// Renders the value for command lines and files: strings verbatim,
    /// everything else as JSON.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Debug for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sensitive {
            f.write_str("OutputValue(<sensitive>)")
        } else {
            f.debug_tuple("OutputValue").field(&self.value).finish()
        }
    }
}

/// Outputs produced by a successful apply.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DeploymentOutput {
    values: BTreeMap<String, OutputValue>,
}

impl DeploymentOutput {
    /// Parses the JSON document printed by `terraform output -json`.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the document does not match.
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(contents)
    }

    /// Looks up an output by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.values.get(name)
    }

    /// Output names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when the apply produced no outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, OutputValue)> for DeploymentOutput {
    fn from_iter<I: IntoIterator<Item = (String, OutputValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
