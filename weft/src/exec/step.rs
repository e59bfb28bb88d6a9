//! Step driver: the per-step state machine.
//!
//! A step handler only dispatches work; it proves completion by writing a
//! fresh output record (with a new timestamp) into `pklres`. The driver
//! snapshots the step's last-known timestamp, invokes the handler, then
//! polls until the timestamp changes or the deadline passes. It never
//! inspects the result content, which keeps handler scheduling (inline or
//! fire-and-forget) decoupled from completion detection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::errors::ResolverError;
use crate::reader::{PklresReader, ReaderError};

/// Step names, in dispatch order.
pub const STEP_EXEC: &str = "exec";
pub const STEP_PYTHON: &str = "python";
pub const STEP_LLM: &str = "llm";
pub const STEP_CLIENT: &str = "client";

/// Error a handler surfaces through the uniform `handler() -> Result`
/// contract.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Writes a step output record: the given fields plus a fresh `timestamp`
/// in epoch nanoseconds. This is the record the driver polls.
pub async fn publish_step_output(
    pklres: &PklresReader,
    resource_id: &str,
    step: &str,
    mut fields: serde_json::Map<String, serde_json::Value>,
) -> Result<(), ReaderError> {
    let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    fields.insert("timestamp".to_string(), serde_json::json!(now));
    let record = serde_json::Value::Object(fields).to_string();
    pklres.set(resource_id, step, &record).await
}

fn parse_timestamp(record: Option<&str>) -> i64 {
    record
        .and_then(|text| serde_json::from_str::<serde_json::Value>(text).ok())
        .and_then(|v| v.get("timestamp").and_then(serde_json::Value::as_i64))
        .unwrap_or(0)
}

/// Drives one step to completion per the snapshot/dispatch/wait contract.
pub struct StepDriver {
    pklres: Arc<PklresReader>,
    poll_interval: Duration,
    default_timeout: Duration,
}

impl StepDriver {
    pub fn new(pklres: Arc<PklresReader>) -> Self {
        Self {
            pklres,
            poll_interval: Duration::from_millis(100),
            default_timeout: Duration::from_secs(60),
        }
    }

    /// Overrides the polling interval and the default timeout. Tests use
    /// tighter values.
    pub fn with_timing(mut self, poll_interval: Duration, default_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.default_timeout = default_timeout;
        self
    }

    /// Last-known output timestamp for the step; 0 when no record exists.
    pub async fn current_timestamp(
        &self,
        resource_id: &str,
        step: &str,
    ) -> Result<i64, ReaderError> {
        let record = self.pklres.get(resource_id, step).await?;
        Ok(parse_timestamp(record.as_deref()))
    }

    /// Snapshots the timestamp, runs the handler, and waits for a change.
    ///
    /// `timeout` falls back to the driver default (60 s). The handler may
    /// publish before returning or dispatch work that publishes later;
    /// either satisfies the wait.
    pub async fn process_step<F, Fut>(
        &self,
        cancel: &CancellationToken,
        resource_id: &str,
        step: &'static str,
        timeout: Option<Duration>,
        handler: F,
    ) -> Result<(), ResolverError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), HandlerError>>,
    {
        let t0 = self.current_timestamp(resource_id, step).await?;
        let timeout = timeout.unwrap_or(self.default_timeout);
        tracing::debug!(resource_id, step, t0, ?timeout, "dispatching step");

        handler().await.map_err(|e| ResolverError::StepFailure {
            action_id: resource_id.to_string(),
            step,
            detail: e.to_string(),
            request_terminal: step == STEP_LLM,
        })?;

        self.wait_for_timestamp_change(cancel, resource_id, step, t0, timeout)
            .await
    }

    /// Polls the step's output timestamp until it differs from `t0` or
    /// the deadline passes.
    async fn wait_for_timestamp_change(
        &self,
        cancel: &CancellationToken,
        resource_id: &str,
        step: &'static str,
        t0: i64,
        timeout: Duration,
    ) -> Result<(), ResolverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut ticks = IntervalStream::new(tokio::time::interval(self.poll_interval));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ResolverError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(ResolverError::StepTimeout {
                        action_id: resource_id.to_string(),
                        step,
                    });
                }
                _ = ticks.next() => {
                    let now = self.current_timestamp(resource_id, step).await?;
                    if now != t0 {
                        tracing::debug!(resource_id, step, t0, now, "step output observed");
                        return Ok(());
                    }
                }
            }
        }
    }
}
