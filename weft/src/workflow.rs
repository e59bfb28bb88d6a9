//! Workflow record: the resolved description of what to run.
//!
//! A workflow names the agent, its version, and the target action the
//! orchestrator drives to; optional settings select API-server mode and
//! agent environment hints. Resolved before orchestration starts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error loading a workflow file.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("read workflow file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse workflow: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("workflow is missing a target action")]
    MissingTarget,
}

/// Per-agent environment hints carried in workflow settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// When true, the surrounding tooling provisions an Anaconda
    /// environment for Python steps.
    pub install_anaconda: bool,
    /// Model names the agent's chat steps may reference.
    pub models: Vec<String>,
}

/// Workflow settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowSettings {
    /// When true, the run carries an HTTP request descriptor and the
    /// run-block processor applies request validation.
    pub api_server_mode: bool,
    pub agent_settings: AgentSettings,
}

/// The resolved workflow record.
///
/// **Interaction**: owned by the resolver session; its agent id and
/// version drive action-id canonicalisation, and `target_action_id`
/// roots the dependency walk.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Agent name used to canonicalise unqualified action ids.
    pub agent_id: String,
    /// Agent version used to canonicalise unqualified action ids.
    pub version: String,
    /// Action the orchestrator resolves and drives to completion.
    pub target_action_id: String,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    /// Loads a workflow from a YAML (or JSON) file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let text = std::fs::read_to_string(path)?;
        let workflow: Workflow = serde_yaml::from_str(&text)?;
        if workflow.target_action_id.trim().is_empty() {
            return Err(WorkflowError::MissingTarget);
        }
        Ok(workflow)
    }

    /// True when the workflow runs in API-server mode.
    pub fn api_server_mode(&self) -> bool {
        self.settings.api_server_mode
    }
}
