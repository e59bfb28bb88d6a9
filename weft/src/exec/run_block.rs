//! Per-resource run-block processing: gates, validators, step dispatch.
//!
//! `(entry, record, has_items)` in, `(proceed, err)` out. `proceed` is
//! false for every no-work outcome (no run-block, validation skip, skip
//! condition, fail-fast); errors are the gate rejections and step
//! failures. Step dispatch order within one resource is fixed:
//! exec, python, chat, http client.

use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::errors::ResolverError;
use crate::resource::{is_truthy, ResourceNodeEntry, ResourceRecord, RunBlock};

use super::step::{STEP_CLIENT, STEP_EXEC, STEP_LLM, STEP_PYTHON};
use super::validation::{validate_request, ValidationOutcome};
use super::Resolver;

impl Resolver {
    /// Processes one resource's run-block.
    ///
    /// Increments the file run counter before anything else, so even a
    /// resource with no run-block counts as visited.
    pub(crate) async fn process_run_block(
        &mut self,
        entry: &ResourceNodeEntry,
        record: &ResourceRecord,
        has_items: bool,
    ) -> Result<bool, ResolverError> {
        *self.file_run_counter.entry(entry.file.clone()).or_insert(0) += 1;

        let Some(run) = &record.run else {
            return Ok(false);
        };
        let action_id = &record.action_id;

        if has_items {
            self.wait_for_items(action_id).await?;
        }

        if self.api_server_mode() {
            let request = self.request.as_ref().ok_or_else(|| {
                ResolverError::CastFailure {
                    action_id: action_id.clone(),
                    detail: "api mode without a request descriptor".to_string(),
                }
            })?;
            let text = std::fs::read_to_string(&entry.file)?;
            match validate_request(&text, run, request)? {
                ValidationOutcome::Proceed => {}
                ValidationOutcome::Skip => {
                    tracing::debug!(
                        action_id = action_id.as_str(),
                        "route/method restriction skipped resource"
                    );
                    return Ok(false);
                }
            }
        }

        if run.skip_condition.iter().any(is_truthy) {
            tracing::debug!(action_id = action_id.as_str(), "skip condition matched");
            return Ok(false);
        }

        if let Some(preflight) = &run.preflight_check {
            if !preflight.validations.is_empty() && !preflight.validations.iter().all(is_truthy) {
                let (code, message) = match &preflight.error {
                    Some(err) => (err.code, format!("{}: {}", err.message, action_id)),
                    None => (500, format!("preflight validation failed: {}", action_id)),
                };
                return Err(ResolverError::PreflightFailed { code, message });
            }
        }

        self.dispatch_steps(action_id, run).await?;
        Ok(true)
    }

    /// Runs the declared steps in the fixed order. Before each handler
    /// the error sink is checked (O(1)): any accumulated error skips the
    /// remaining work so the response resource can still compose.
    async fn dispatch_steps(&self, action_id: &str, run: &RunBlock) -> Result<(), ResolverError> {
        if let Some(exec) = &run.exec {
            if self.fail_fast(action_id, STEP_EXEC) {
                return Ok(());
            }
            let timeout = exec.timeout_duration.as_ref().and_then(|d| d.to_duration());
            self.driver
                .process_step(&self.cancel, action_id, STEP_EXEC, timeout, || {
                    self.handlers.run_exec(action_id, exec, timeout)
                })
                .await?;
        }

        if let Some(python) = &run.python {
            if self.fail_fast(action_id, STEP_PYTHON) {
                return Ok(());
            }
            let timeout = python.timeout_duration.as_ref().and_then(|d| d.to_duration());
            self.driver
                .process_step(&self.cancel, action_id, STEP_PYTHON, timeout, || {
                    self.handlers.run_python(action_id, python, timeout)
                })
                .await?;
        }

        if let Some(chat) = &run.chat {
            if self.fail_fast(action_id, STEP_LLM) {
                return Ok(());
            }
            let timeout = chat.timeout_duration.as_ref().and_then(|d| d.to_duration());
            self.driver
                .process_step(&self.cancel, action_id, STEP_LLM, timeout, || {
                    self.handlers.run_chat(action_id, chat, timeout)
                })
                .await?;
        }

        if let Some(client) = &run.http_client {
            if self.fail_fast(action_id, STEP_CLIENT) {
                return Ok(());
            }
            let timeout = client.timeout_duration.as_ref().and_then(|d| d.to_duration());
            self.driver
                .process_step(&self.cancel, action_id, STEP_CLIENT, timeout, || {
                    self.handlers.run_http(action_id, client, timeout)
                })
                .await?;
        }

        Ok(())
    }

    fn fail_fast(&self, action_id: &str, step: &str) -> bool {
        let skip = self.sink.has_errors(&self.request_id);
        if skip {
            tracing::warn!(action_id, step, "request already failed; skipping step");
        }
        skip
    }

    /// Iteration pre-wait: polls the item store until it is non-empty or
    /// the deadline passes.
    async fn wait_for_items(&self, action_id: &str) -> Result<(), ResolverError> {
        let deadline = tokio::time::Instant::now() + self.item_deadline;
        let mut ticks = IntervalStream::new(tokio::time::interval(self.item_poll));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ResolverError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ResolverError::ItemsTimeout(action_id.to_string()));
                }
                _ = ticks.next() => {
                    if !self.readers.item.list().await?.is_empty() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
