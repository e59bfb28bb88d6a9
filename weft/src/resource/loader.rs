//! Resource loading and discovery.
//!
//! The loader glues the evaluator seam to the typed record shapes:
//! it infers the file's declared type from its first directive line,
//! evaluates, deserializes, and canonicalises every action id against the
//! workflow identity. In API-server mode it first publishes the request's
//! fields to `pklres` so templated fields can observe them on reload.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::DependencyGraph;
use crate::ident;
use crate::reader::PklresReader;
use crate::request::RequestDescriptor;

use super::{
    walk_resource_files, EvalError, Evaluator, ResourceNodeEntry, ResourceRecord, ResourceType,
};

/// Collection name under which the current request's fields are always
/// published, alongside the request-id collection.
pub(crate) const CURRENT_REQUEST_COLLECTION: &str = "current";

/// Error loading a resource.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file does not exist.
    #[error("resource file not found: {0}")]
    NotFound(String),
    #[error("read resource file: {0}")]
    Read(#[from] std::io::Error),
    /// Evaluation failed.
    #[error("evaluate resource: {0}")]
    Eval(#[from] EvalError),
    /// Evaluator output did not fit the resource shape, or an action id
    /// did not parse.
    #[error("cast resource: {0}")]
    Cast(String),
}

/// Loads typed resource records through the evaluator seam.
///
/// **Interaction**: owned by the resolver session; discovery builds the
/// entries list and the dependency graph once per request, and each node
/// is re-loaded through the same loader before it runs so templates see
/// fresh upstream outputs.
pub struct ResourceLoader {
    evaluator: Arc<dyn Evaluator>,
    agent_id: String,
    agent_version: String,
    pklres: Arc<PklresReader>,
}

impl ResourceLoader {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        agent_id: impl Into<String>,
        agent_version: impl Into<String>,
        pklres: Arc<PklresReader>,
    ) -> Self {
        Self {
            evaluator,
            agent_id: agent_id.into(),
            agent_version: agent_version.into(),
            pklres,
        }
    }

    /// Infers the declared type from the file's first non-blank line.
    pub fn infer_type(&self, file: &Path) -> Result<ResourceType, LoadError> {
        if !file.exists() {
            return Err(LoadError::NotFound(file.display().to_string()));
        }
        let text = std::fs::read_to_string(file)?;
        Ok(ResourceType::infer(&text))
    }

    /// Loads one resource record with canonical action ids.
    pub async fn load(&self, file: &Path) -> Result<ResourceRecord, LoadError> {
        // The inferred type picks the evaluator template; a mismatch still
        // yields the generic resource shape because every block is optional.
        let declared = self.infer_type(file)?;
        tracing::debug!(file = %file.display(), ?declared, "loading resource");

        let value = self.evaluator.evaluate(file).await?;
        let mut record: ResourceRecord =
            serde_json::from_value(value).map_err(|e| LoadError::Cast(e.to_string()))?;
        if record.action_id.trim().is_empty() {
            return Err(LoadError::Cast(format!(
                "resource {} declares no actionId",
                file.display()
            )));
        }

        record.action_id = self.canonical(&record.action_id)?;
        let requires: Vec<String> = record
            .requires
            .iter()
            .map(|r| self.canonical(r))
            .collect::<Result<_, _>>()?;
        record.requires = requires;
        Ok(record)
    }

    /// API-server mode load: publishes the request's fields under the
    /// request-id collection and the literal `current` collection, then
    /// evaluates as [`load`](Self::load).
    pub async fn load_with_request_context(
        &self,
        file: &Path,
        request: &RequestDescriptor,
    ) -> Result<ResourceRecord, LoadError> {
        let fields: [(&str, String); 6] = [
            ("path", request.path.clone()),
            ("method", request.method.clone()),
            ("ip", request.ip.clone()),
            ("headers", request.headers_json()),
            ("params", request.params_json()),
            ("data", request.body_text()),
        ];
        // Publication failures degrade templating but do not block the
        // load; correctness-critical reader failures surface elsewhere.
        for collection in [request.id.as_str(), CURRENT_REQUEST_COLLECTION] {
            for &(key, ref value) in &fields {
                if let Err(e) = self.pklres.set(collection, key, value).await {
                    tracing::warn!(collection, key, error = %e, "failed to publish request field");
                }
            }
        }
        self.load(file).await
    }

    /// Walks the resources directory, loads every `.pkl` file, and
    /// returns the node entries (in walk order) plus the dependency graph.
    pub async fn discover(
        &self,
        resources_dir: &Path,
    ) -> Result<(Vec<ResourceNodeEntry>, DependencyGraph), LoadError> {
        let mut entries = Vec::new();
        let mut graph = DependencyGraph::new();

        for file in walk_resource_files(resources_dir)? {
            let record = self.load(&file).await?;
            tracing::debug!(
                action_id = record.action_id.as_str(),
                file = %file.display(),
                requires = record.requires.len(),
                "discovered resource"
            );
            graph.insert(record.action_id.clone(), record.requires.clone());
            entries.push(ResourceNodeEntry {
                action_id: record.action_id,
                file,
            });
        }

        Ok((entries, graph))
    }

    fn canonical(&self, raw: &str) -> Result<String, LoadError> {
        ident::canonicalize(raw, &self.agent_id, &self.agent_version)
            .map_err(|e| LoadError::Cast(e.to_string()))
    }
}
