//! Resolver error kinds and the per-request error sink.
//!
//! Every failure the resolver can surface maps to one [`ResolverError`]
//! variant with an HTTP-style status code. Errors are appended to a
//! [`RequestErrorSink`] keyed by request id; the sink is shared by
//! reference with the response composer, which drains it after the
//! orchestrator finishes. The sink is an explicit value carried in the
//! request context, never process-global state.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::reader::ReaderError;
use crate::resource::LoadError;

/// Resolver failure.
///
/// Variant choice decides the status code and how far the failure
/// propagates: resource-terminal errors stop one resource but let the
/// orchestrator walk on to response composition; request-terminal errors
/// stop the whole request.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Resource file evaluation failed.
    #[error("load failure for {action_id}: {source}")]
    LoadFailure {
        action_id: String,
        #[source]
        source: LoadError,
    },

    /// Evaluator output could not be interpreted as a resource.
    #[error("cast failure for {action_id}: {detail}")]
    CastFailure { action_id: String, detail: String },

    /// Dependency walk found a cycle through the named action.
    #[error("cyclic dependency detected at {0}")]
    CyclicDependency(String),

    /// A `request.params("…")` literal is not in the allow-list.
    #[error("param not allowed: {0}")]
    ParamNotAllowed(String),

    /// A `request.header("…")` literal is not in the allow-list.
    #[error("header not allowed: {0}")]
    HeaderNotAllowed(String),

    /// A preflight validation failed; code and message come from the
    /// resource when declared.
    #[error("preflight failed: {message}")]
    PreflightFailed { code: u16, message: String },

    /// A step handler returned an error.
    #[error("step {step} failed for {action_id}: {detail}")]
    StepFailure {
        action_id: String,
        step: &'static str,
        detail: String,
        /// Chat failures are request-terminal; other steps are
        /// resource-terminal.
        request_terminal: bool,
    },

    /// The step driver deadline elapsed without a timestamp change.
    #[error("step {step} timed out for {action_id}")]
    StepTimeout {
        action_id: String,
        step: &'static str,
    },

    /// The iteration pre-wait deadline elapsed with an empty item store.
    #[error("items never became available for {0}")]
    ItemsTimeout(String),

    /// The request context was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// A reader failure that blocks correctness for the request.
    #[error("reader failure: {0}")]
    Reader(#[from] ReaderError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolverError {
    /// HTTP-style status code for this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ParamNotAllowed(_) | Self::HeaderNotAllowed(_) => 400,
            Self::PreflightFailed { code, .. } => *code,
            Self::Cancelled => 499,
            _ => 500,
        }
    }

    /// True when this error should stop the whole request rather than
    /// just the current resource.
    pub fn request_terminal(&self) -> bool {
        match self {
            Self::LoadFailure { .. }
            | Self::CastFailure { .. }
            | Self::CyclicDependency(_)
            | Self::ItemsTimeout(_)
            | Self::Cancelled
            | Self::Reader(_)
            | Self::Io(_) => true,
            Self::StepFailure {
                request_terminal, ..
            } => *request_terminal,
            _ => false,
        }
    }
}

/// One structured error, as stored in the sink and serialised into the
/// response body.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionError {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
}

impl ActionError {
    /// Builds the sink entry for a resolver error attributed to an action.
    pub fn from_resolver(err: &ResolverError, action_id: &str) -> Self {
        Self {
            code: err.status_code(),
            message: err.to_string(),
            action_id: Some(action_id.to_string()),
        }
    }
}

/// Ordered per-request error accumulator.
///
/// Appends and reads are serialised per request id. Cloning is cheap; all
/// clones share the same map. The resolver appends, the response composer
/// drains; the resolver itself never clears a request's entries.
#[derive(Clone, Default)]
pub struct RequestErrorSink {
    inner: Arc<DashMap<String, Vec<ActionError>>>,
}

impl RequestErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one error for the request, preserving insertion order.
    pub fn append(&self, request_id: &str, error: ActionError) {
        self.inner
            .entry(request_id.to_string())
            .or_default()
            .push(error);
    }

    /// True when the request has accumulated at least one error. O(1).
    pub fn has_errors(&self, request_id: &str) -> bool {
        self.inner
            .get(request_id)
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of the request's errors in insertion order.
    pub fn snapshot(&self, request_id: &str) -> Vec<ActionError> {
        self.inner
            .get(request_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Removes and returns the request's errors. Called by the response
    /// composer after the orchestrator exits.
    pub fn drain(&self, request_id: &str) -> Vec<ActionError> {
        self.inner
            .remove(request_id)
            .map(|(_, v)| v)
            .unwrap_or_default()
    }
}
