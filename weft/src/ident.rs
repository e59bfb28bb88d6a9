//! Canonical action identifiers.
//!
//! A resource's logical name may be short (`foo`), versioned (`foo:2.0`),
//! or fully qualified (`@agent/foo:1.2.3`). Everything that keys a graph
//! node or a reader collection uses the canonical form
//! `@<agent>/<short>:<version>`.

use std::fmt;

use thiserror::Error;

/// Error parsing an action identifier.
#[derive(Debug, Error)]
pub enum IdentError {
    /// The identifier is empty or whitespace.
    #[error("empty action id")]
    Empty,
    /// A qualified id is missing its short name (e.g. `@agent:1`).
    #[error("malformed action id: {0}")]
    Malformed(String),
}

/// A parsed action identifier: optional agent qualifier, short name,
/// optional version.
///
/// **Interaction**: produced by [`ActionId::parse`]; turned into the
/// canonical string with [`ActionId::canonical`] before use as a graph
/// key or a `pklres` collection name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionId {
    /// Agent qualifier without the leading `@`, when the id was qualified.
    pub agent: Option<String>,
    /// Short name (always present).
    pub name: String,
    /// Declared version, when present.
    pub version: Option<String>,
}

impl ActionId {
    /// Parses any accepted form: `foo`, `foo:2.0`, `@a/foo`, `@a/foo:3`.
    pub fn parse(raw: &str) -> Result<Self, IdentError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentError::Empty);
        }

        let (agent, rest) = match raw.strip_prefix('@') {
            Some(qualified) => {
                let (agent, name_part) = qualified
                    .split_once('/')
                    .ok_or_else(|| IdentError::Malformed(raw.to_string()))?;
                if agent.is_empty() || name_part.is_empty() {
                    return Err(IdentError::Malformed(raw.to_string()));
                }
                (Some(agent.to_string()), name_part)
            }
            None => (None, raw),
        };

        let (name, version) = match rest.split_once(':') {
            Some((n, v)) if !n.is_empty() && !v.is_empty() => (n.to_string(), Some(v.to_string())),
            Some(_) => return Err(IdentError::Malformed(raw.to_string())),
            None => (rest.to_string(), None),
        };

        Ok(Self {
            agent,
            name,
            version,
        })
    }

    /// Returns true when the id carries an agent qualifier.
    pub fn is_qualified(&self) -> bool {
        self.agent.is_some()
    }

    /// Canonicalises against the workflow identity.
    ///
    /// Unqualified names take both the workflow's agent and version; the
    /// declared version of an unqualified name is ignored. Qualified names
    /// keep their agent, and keep their version when declared, falling back
    /// to the workflow version otherwise.
    pub fn canonical(&self, workflow_agent: &str, workflow_version: &str) -> String {
        match &self.agent {
            Some(agent) => {
                let version = self.version.as_deref().unwrap_or(workflow_version);
                format!("@{}/{}:{}", agent, self.name, version)
            }
            None => format!("@{}/{}:{}", workflow_agent, self.name, workflow_version),
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(agent) = &self.agent {
            write!(f, "@{}/", agent)?;
        }
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

/// Canonicalises a raw action id string against the workflow identity.
///
/// Convenience over [`ActionId::parse`] + [`ActionId::canonical`]; ids that
/// are already canonical come back byte-identical.
pub fn canonicalize(raw: &str, workflow_agent: &str, workflow_version: &str) -> Result<String, IdentError> {
    Ok(ActionId::parse(raw)?.canonical(workflow_agent, workflow_version))
}
