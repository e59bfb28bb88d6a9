//! Execution core: the per-request resolver session.
//!
//! [`Resolver`] owns everything one request needs — workflow identity,
//! readers, loader, step driver, executors, error sink, run counters —
//! and drives the dependency stack to completion. The submodules split
//! the work the way the contracts do: [`step`] is the per-step state
//! machine, `run_block` the per-resource gates and dispatch, `iteration`
//! the fan-out loop, `orchestrator` the top-level walk.

pub mod handlers;
pub mod step;

mod iteration;
mod orchestrator;
mod run_block;
mod validation;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::{ActionError, RequestErrorSink, ResolverError};
use crate::llm::LlmClient;
use crate::reader::Readers;
use crate::request::RequestDescriptor;
use crate::resource::{Evaluator, ResourceLoader, ResourceNodeEntry};
use crate::workflow::Workflow;
use crate::graph::DependencyGraph;

use handlers::StepHandlers;
use step::StepDriver;

pub use validation::{validate_request, ValidationOutcome};

/// Everything needed to construct a resolver session.
pub struct ResolverOptions {
    pub workflow: Workflow,
    /// Directory of `.pkl` resource files.
    pub resources_dir: PathBuf,
    /// Durable reader stores (`memory.db`, `tool.db`, `pklres.db`).
    pub data_dir: PathBuf,
    /// Per-request files: session/item stores, stamp, `response.json`.
    pub run_dir: PathBuf,
    /// Present in API-server mode; its id keys the error sink and the
    /// per-request files.
    pub request: Option<RequestDescriptor>,
    pub evaluator: Arc<dyn Evaluator>,
    pub llm: Arc<dyn LlmClient>,
}

/// One request's resolver session.
///
/// Construct with [`Resolver::new`], drive with
/// [`handle_run_action`](Resolver::handle_run_action). All owned stores
/// are released on every exit path, including panic unwinding.
pub struct Resolver {
    pub(crate) workflow: Workflow,
    pub(crate) resources_dir: PathBuf,
    pub(crate) request: Option<RequestDescriptor>,
    pub(crate) request_id: String,
    pub(crate) readers: Arc<Readers>,
    pub(crate) loader: ResourceLoader,
    pub(crate) driver: StepDriver,
    pub(crate) handlers: StepHandlers,
    pub(crate) sink: RequestErrorSink,
    pub(crate) cancel: CancellationToken,
    pub(crate) resources: Vec<ResourceNodeEntry>,
    pub(crate) dependencies: DependencyGraph,
    pub(crate) file_run_counter: HashMap<PathBuf, u64>,
    pub(crate) item_poll: Duration,
    pub(crate) item_deadline: Duration,
    stamp_file: PathBuf,
    response_path: PathBuf,
}

impl Resolver {
    /// Opens the readers, stamps the request, and wires the loader and
    /// executors. No resource is loaded yet; discovery happens inside
    /// [`handle_run_action`](Resolver::handle_run_action).
    pub fn new(opts: ResolverOptions) -> Result<Self, ResolverError> {
        let request_id = opts
            .request
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let readers = Arc::new(Readers::open(
            &opts.data_dir,
            &opts.run_dir,
            &request_id,
            &opts.workflow.agent_id,
            &opts.workflow.version,
        )?);

        let loader = ResourceLoader::new(
            opts.evaluator,
            &opts.workflow.agent_id,
            &opts.workflow.version,
            readers.pklres.clone(),
        );
        let driver = StepDriver::new(readers.pklres.clone());
        let handlers = StepHandlers::new(readers.pklres.clone(), opts.llm);

        let stamp_file = opts.run_dir.join(format!("{}.stamp", request_id));
        std::fs::write(&stamp_file, request_id.as_bytes())?;
        let response_path = opts.run_dir.join(format!("response_{}.json", request_id));

        Ok(Self {
            workflow: opts.workflow,
            resources_dir: opts.resources_dir,
            request: opts.request,
            request_id,
            readers,
            loader,
            driver,
            handlers,
            sink: RequestErrorSink::new(),
            cancel: CancellationToken::new(),
            resources: Vec::new(),
            dependencies: DependencyGraph::new(),
            file_run_counter: HashMap::new(),
            item_poll: Duration::from_millis(500),
            item_deadline: Duration::from_secs(30),
            stamp_file,
            response_path,
        })
    }

    /// Overrides the step driver's polling interval and default timeout.
    pub fn with_step_timing(mut self, poll: Duration, default_timeout: Duration) -> Self {
        self.driver = StepDriver::new(self.readers.pklres.clone()).with_timing(poll, default_timeout);
        self
    }

    /// Overrides the iteration pre-wait polling interval and deadline.
    pub fn with_item_timing(mut self, poll: Duration, deadline: Duration) -> Self {
        self.item_poll = poll;
        self.item_deadline = deadline;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// The error sink for this request. Clones share state; the caller
    /// drains it after the run to build an error response.
    pub fn sink(&self) -> RequestErrorSink {
        self.sink.clone()
    }

    /// Token that cancels in-flight waits for this request.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Where the response artefact is materialised.
    pub fn response_path(&self) -> &Path {
        &self.response_path
    }

    /// Per-file run counts: how many times each resource file's run-block
    /// processor was entered this request.
    pub fn file_run_counters(&self) -> &HashMap<PathBuf, u64> {
        &self.file_run_counter
    }

    pub(crate) fn api_server_mode(&self) -> bool {
        self.workflow.api_server_mode() && self.request.is_some()
    }

    /// Appends a resolver error to the sink, attributed to an action.
    pub(crate) fn record_error(&self, action_id: &str, err: &ResolverError) {
        tracing::error!(action_id, error = %err, "recording action error");
        self.sink
            .append(&self.request_id, ActionError::from_resolver(err, action_id));
    }

    /// Releases everything the session owns: the stamp file, the
    /// session-scoped reader files. Runs on every exit path; idempotent.
    pub(crate) fn cleanup(&self) {
        match std::fs::remove_file(&self.stamp_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.stamp_file.display(), error = %e, "failed to remove stamp file")
            }
        }
        self.readers.close();
        for (file, count) in &self.file_run_counter {
            tracing::info!(file = %file.display(), runs = count, "resource run count");
        }
    }
}
