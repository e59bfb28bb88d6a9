//! # Weft
//!
//! A dependency-ordered **agent action resolver**: given a declarative
//! workflow of interdependent resources, weft loads each resource
//! definition, computes a topological execution order, and drives each
//! resource's side-effecting step — a shell command, a Python script, an
//! LLM chat invocation, or an HTTP client call — to completion, with
//! per-request validation, fan-out over item lists, preflight/skip
//! gates, timeouts, and fail-fast error accumulation.
//!
//! ## How a request runs
//!
//! 1. The [`exec::Resolver`] opens the six readers, stamps the request,
//!    and discovers the resources directory through the
//!    [`resource::ResourceLoader`].
//! 2. The [`graph::DependencyGraph`] yields a post-order stack for the
//!    workflow's target action: dependencies strictly before dependents,
//!    cycles rejected.
//! 3. Per node, the run-block processor applies the gates (request
//!    validation, skip condition, preflight) and dispatches the declared
//!    steps in `exec → python → chat → http client` order through the
//!    step driver. A resource with `items` fans out: one invocation per
//!    value, with a reload in between so templates observe the current
//!    item and fresh upstream outputs.
//! 4. Each step handler publishes its output record (with a fresh
//!    timestamp) through the `pklres` reader; the
//!    [`exec::step::StepDriver`] confirms completion by observing the
//!    timestamp change, never by inspecting the payload.
//! 5. Errors accumulate in the [`errors::RequestErrorSink`]; once the
//!    request has failed, remaining handlers are skipped but the walk
//!    continues so a resource declaring an `apiResponse` block can still
//!    compose `response.json`.
//!
//! ## Main modules
//!
//! - [`workflow`]: the resolved [`Workflow`] record.
//! - [`resource`]: record shapes, the evaluator seam, loading and
//!   discovery.
//! - [`graph`]: [`DependencyGraph`] and the post-order stack.
//! - [`reader`]: the URI-addressable SQLite stores
//!   (`memory`/`session`/`tool`/`item`/`agent`/`pklres`).
//! - [`exec`]: the per-request [`Resolver`] session, step driver and
//!   default executors.
//! - [`llm`]: [`LlmClient`] trait with mock and OpenAI-compatible
//!   implementations.
//! - [`errors`]: [`ResolverError`] kinds and the per-request sink.
//! - [`response`]: the `response.json` composer.

pub mod errors;
pub mod exec;
pub mod graph;
pub mod ident;
pub mod llm;
pub mod reader;
pub mod request;
pub mod resource;
pub mod response;
pub mod workflow;

pub use errors::{ActionError, RequestErrorSink, ResolverError};
pub use exec::{Resolver, ResolverOptions};
pub use graph::DependencyGraph;
pub use llm::{LlmClient, MockLlm, OpenAiCompatClient};
pub use reader::{Reader, Readers};
pub use request::RequestDescriptor;
pub use resource::{Evaluator, PklEvaluator, ResourceLoader, ResourceRecord};
pub use workflow::Workflow;
