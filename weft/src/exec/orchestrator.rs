//! Top-level request orchestration.
//!
//! `handle_run_action` resolves the workflow target, discovers the
//! resources directory, builds the dependency stack, and drives each
//! node through iteration and run-block processing. Node errors are
//! appended to the sink and the walk continues, so a downstream resource
//! carrying an `apiResponse` block can still compose the error response.
//! Cleanup (stamp file, session-scoped stores) runs on every exit path,
//! including panic unwinding.

use std::collections::HashSet;
use std::path::Path;

use futures::FutureExt;

use crate::errors::{ActionError, ResolverError};
use crate::ident;
use crate::resource::{LoadError, ResourceNodeEntry, ResourceRecord};
use crate::response;

use super::Resolver;

impl Resolver {
    /// Runs the whole request. Returns `Ok(false)` when the walk
    /// completed (even with resource errors in the sink) — the caller
    /// does not need to continue after the orchestrator. Terminal
    /// orchestration failures (discovery, cycles, reader loss,
    /// cancellation) come back as `Err` after an error response has been
    /// composed.
    pub async fn handle_run_action(&mut self) -> Result<bool, ResolverError> {
        let run = std::panic::AssertUnwindSafe(self.run_inner()).catch_unwind().await;
        self.cleanup();

        match run {
            Ok(result) => result.map(|_| false),
            Err(panic) => {
                let trace = std::backtrace::Backtrace::force_capture();
                tracing::error!(request_id = self.request_id.as_str(), %trace, "panic during run");
                std::panic::resume_unwind(panic);
            }
        }
    }

    async fn run_inner(&mut self) -> Result<(), ResolverError> {
        let target = ident::canonicalize(
            &self.workflow.target_action_id,
            &self.workflow.agent_id,
            &self.workflow.version,
        )
        .map_err(|e| ResolverError::CastFailure {
            action_id: self.workflow.target_action_id.clone(),
            detail: e.to_string(),
        })?;
        tracing::info!(
            request_id = self.request_id.as_str(),
            target = target.as_str(),
            "resolving action"
        );

        let resources_dir = self.resources_dir.clone();
        match self.loader.discover(&resources_dir).await {
            Ok((entries, graph)) => {
                self.resources = entries;
                self.dependencies = graph;
            }
            Err(e) => {
                let err = ResolverError::LoadFailure {
                    action_id: target.clone(),
                    source: e,
                };
                return self.fail_request(&target, err);
            }
        }

        let mut visited = HashSet::new();
        let stack = match self.dependencies.build_dependency_stack(&target, &mut visited) {
            Ok(stack) => stack,
            Err(e) => {
                let err = ResolverError::from(e);
                return self.fail_request(&target, err);
            }
        };
        tracing::debug!(depth = stack.len(), "dependency stack built");

        for node in &stack {
            if self.cancel.is_cancelled() {
                return self.fail_request(node, ResolverError::Cancelled);
            }
            let Some(entry) = self.resources.iter().find(|e| &e.action_id == node).cloned()
            else {
                tracing::warn!(action_id = node.as_str(), "no file for stacked action");
                continue;
            };

            let record = match self.load_record(&entry.file).await {
                Ok(record) => record,
                Err(err) => {
                    self.record_error(node, &err);
                    continue;
                }
            };

            self.run_node(&entry, &record).await;
        }

        Ok(())
    }

    /// Drives one stacked node: fan-out or single run, then response
    /// materialisation when the resource declares it.
    async fn run_node(&mut self, entry: &ResourceNodeEntry, record: &ResourceRecord) {
        let action_id = &record.action_id;
        let has_items = record.items.as_ref().map(|v| !v.is_empty()).unwrap_or(false);

        // Fail-fast: once the request has errors, only response
        // composition remains interesting for the remaining nodes.
        let mut proceed = false;
        if !self.sink.has_errors(&self.request_id) {
            let result = if has_items {
                self.run_with_items(entry, record).await.map(|_| true)
            } else {
                self.process_run_block(entry, record, false).await
            };
            match result {
                Ok(p) => proceed = p,
                Err(err) => self.record_error(action_id, &err),
            }
        } else {
            tracing::warn!(
                action_id = action_id.as_str(),
                "request already failed; skipping run-block"
            );
        }

        let api_block = record.run.as_ref().and_then(|r| r.api_response.as_ref());
        if let Some(block) = api_block {
            if proceed || self.sink.has_errors(&self.request_id) {
                let errors = self.sink.snapshot(&self.request_id);
                let path = self.response_path().to_path_buf();
                if let Err(e) = response::write_response(&path, Some(block), &errors) {
                    tracing::error!(action_id = action_id.as_str(), error = %e, "failed to write response");
                } else {
                    tracing::info!(
                        action_id = action_id.as_str(),
                        path = %path.display(),
                        "response materialised"
                    );
                }
            }
        }
    }

    /// Loads one record through the request-context loader in API mode,
    /// the plain loader otherwise.
    pub(crate) async fn load_record(&self, file: &Path) -> Result<ResourceRecord, ResolverError> {
        let loaded = if self.api_server_mode() {
            let request = self.request.as_ref().ok_or_else(|| ResolverError::CastFailure {
                action_id: file.display().to_string(),
                detail: "api mode without a request descriptor".to_string(),
            })?;
            self.loader.load_with_request_context(file, request).await
        } else {
            self.loader.load(file).await
        };

        loaded.map_err(|e| match e {
            LoadError::Cast(detail) => ResolverError::CastFailure {
                action_id: file.display().to_string(),
                detail,
            },
            other => ResolverError::LoadFailure {
                action_id: file.display().to_string(),
                source: other,
            },
        })
    }

    /// Records a terminal failure, composes an error response in API
    /// mode, and returns the error.
    fn fail_request(&self, action_id: &str, err: ResolverError) -> Result<(), ResolverError> {
        self.record_error(action_id, &err);
        if self.api_server_mode() {
            let errors: Vec<ActionError> = self.sink.snapshot(&self.request_id);
            if let Err(e) = response::write_response(self.response_path(), None, &errors) {
                tracing::error!(error = %e, "failed to write error response");
            }
        }
        Err(err)
    }
}

impl From<crate::graph::GraphError> for ResolverError {
    fn from(err: crate::graph::GraphError) -> Self {
        match err {
            crate::graph::GraphError::CyclicDependency(node) => {
                ResolverError::CyclicDependency(node)
            }
        }
    }
}
