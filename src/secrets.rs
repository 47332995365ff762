//! Credential material scoped by provider or backend name.
//!
//! Values are held as [`SecretString`] so that `Debug` output and log lines
//! never carry them. They leave this type only through
//! [`ExposeSecret::expose_secret`] at the point where a child process
//! environment or a backend request is assembled.

use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::ConfigError;

/// Fields of one secrets scope (for example `azure` or `azurerm-backend`).
#[derive(Default)]
pub struct SecretScope {
    fields: BTreeMap<String, SecretString>,
}

impl SecretScope {
    /// Returns the named field when present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&SecretString> {
        self.fields.get(name)
    }

    /// Field names, for diagnostics.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl fmt::Debug for SecretScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.fields.keys()).finish()
    }
}

/// Sensitive mapping read once at startup.
#[derive(Default, Deserialize)]
#[serde(from = "BTreeMap<String, BTreeMap<String, String>>")]
pub struct Secrets {
    scopes: BTreeMap<String, SecretScope>,
}

impl Secrets {
    /// Creates an empty set of secrets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a single secret value.
    pub fn insert(
        &mut self,
        scope: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.scopes
            .entry(scope.into())
            .or_default()
            .fields
            .insert(field.into(), SecretString::from(value.into()));
    }

    /// Returns the named scope when present.
    #[must_use]
    pub fn scope(&self, name: &str) -> Option<&SecretScope> {
        self.scopes.get(name)
    }

    /// Returns `true` when a scope with this name exists.
    #[must_use]
    pub fn has_scope(&self, name: &str) -> bool {
        self.scopes.contains_key(name)
    }

    /// Looks up a required field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSecret`] when either the scope or the
    /// field is absent or blank.
    pub fn require(&self, scope: &str, field: &str) -> Result<&SecretString, ConfigError> {
        self.scope(scope)
            .and_then(|fields| fields.field(field))
            .filter(|value| !value.expose_secret().trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSecret {
                scope: scope.to_owned(),
                field: field.to_owned(),
            })
    }

    /// Merges `other` into `self`; fields in `other` win.
    pub fn merge(&mut self, other: Self) {
        for (name, scope) in other.scopes {
            self.scopes
                .entry(name)
                .or_default()
                .fields
                .extend(scope.fields);
        }
    }
}

impl From<BTreeMap<String, BTreeMap<String, String>>> for Secrets {
    fn from(value: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        let scopes = value
            .into_iter()
            .map(|(name, raw)| {
                let fields = raw
                    .into_iter()
                    .map(|(field, secret)| (field, SecretString::from(secret)))
                    .collect();
                (name, SecretScope { fields })
            })
            .collect();
        Self { scopes }
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.scopes.iter()).finish()
    }
}
