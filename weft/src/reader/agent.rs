//! Agent identity resolution.
//!
//! `agent://?op=resolve&agent=A&version=V` with path `/<short>` returns
//! the canonical action id. Defaults come from the workflow identity, so
//! resources can resolve their own short names without restating the
//! agent or version.

use async_trait::async_trait;

use super::{ReadUri, Reader, ReaderError};

/// Resolves short action names to canonical `@agent/short:version` form.
///
/// No backing file: the resolution inputs are the workflow identity plus
/// the URI's overrides.
pub struct AgentReader {
    agent_id: String,
    version: String,
}

impl AgentReader {
    pub fn new(agent_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            version: version.into(),
        }
    }

    /// Canonical id for a short name with optional agent/version overrides.
    pub fn resolve(&self, short: &str, agent: Option<&str>, version: Option<&str>) -> String {
        format!(
            "@{}/{}:{}",
            agent.unwrap_or(&self.agent_id),
            short,
            version.unwrap_or(&self.version)
        )
    }
}

#[async_trait]
impl Reader for AgentReader {
    fn scheme(&self) -> &'static str {
        "agent"
    }

    async fn read(&self, uri: &ReadUri) -> Result<Vec<u8>, ReaderError> {
        match uri.op.as_str() {
            "resolve" => {
                if uri.path.is_empty() {
                    return Err(ReaderError::InvalidUri(
                        "agent:// resolve needs a /<shortName> path".to_string(),
                    ));
                }
                let canonical = self.resolve(&uri.path, uri.param("agent"), uri.param("version"));
                Ok(canonical.into_bytes())
            }
            _ => Err(ReaderError::UnsupportedOp {
                scheme: "agent".to_string(),
                op: uri.op.clone(),
            }),
        }
    }
}
