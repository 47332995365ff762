//! Typed parsing of `terraform workspace list`.

/// Workspaces known to the configured backend.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkspaceList {
    names: Vec<String>,
    current: Option<String>,
}

impl WorkspaceList {
    /// Parses the listing printed by `terraform workspace list`.
    ///
    /// Names are separated by whitespace or newlines; the current workspace
    /// is prefixed with `*`, which is stripped.
    #[must_use]
    pub fn parse(listing: &str) -> Self {
        let mut names = Vec::new();
        let mut current = None;
        let mut marked = false;

        for token in listing.split_whitespace() {
            let name = token.trim_start_matches('*');
            if name.len() != token.len() {
                marked = true;
            }
            if name.is_empty() {
                continue;
            }
            if marked {
                current = Some(name.to_owned());
                marked = false;
            }
            names.push(name.to_owned());
        }

        Self { names, current }
    }

    /// Returns `true` when a workspace called `name` exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|existing| existing == name)
    }

    /// The workspace marked as selected, when the listing had one.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Workspace names in listing order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
