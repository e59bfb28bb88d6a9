//! Declarative-language evaluator seam.
//!
//! The resolver never parses resource bodies itself; it hands the file to
//! an [`Evaluator`] and receives the rendered record as JSON. The default
//! implementation shells out to the `pkl` binary; tests substitute a stub.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Error from an evaluator run.
#[derive(Debug, Error)]
pub enum EvalError {
    /// No `pkl` binary on PATH.
    #[error("pkl binary not found: {0}")]
    BinaryNotFound(String),
    /// The evaluator process failed to start or was killed.
    #[error("failed to run evaluator: {0}")]
    Launch(String),
    /// The evaluator exited non-zero.
    #[error("evaluator failed for {file}: {stderr}")]
    Failed { file: String, stderr: String },
    /// The evaluator ran past its deadline.
    #[error("evaluator timed out for {0}")]
    TimedOut(String),
    /// The evaluator's output was not JSON.
    #[error("evaluator output is not json: {0}")]
    Output(#[from] serde_json::Error),
}

/// Renders one declarative file into its evaluated JSON form.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, file: &Path) -> Result<serde_json::Value, EvalError>;
}

/// Evaluator backed by the external `pkl` CLI (`pkl eval -f json <file>`).
pub struct PklEvaluator {
    binary: PathBuf,
    timeout: Duration,
}

impl PklEvaluator {
    /// Locates `pkl` on PATH.
    pub fn discover() -> Result<Self, EvalError> {
        let binary = which::which("pkl").map_err(|e| EvalError::BinaryNotFound(e.to_string()))?;
        Ok(Self::with_binary(binary))
    }

    /// Uses an explicit binary path. Evaluation deadline defaults to 60 s.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Evaluator for PklEvaluator {
    async fn evaluate(&self, file: &Path) -> Result<serde_json::Value, EvalError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg("eval").arg("-f").arg("json").arg(file);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| EvalError::TimedOut(file.display().to_string()))?
            .map_err(|e| EvalError::Launch(e.to_string()))?;

        if !output.status.success() {
            return Err(EvalError::Failed {
                file: file.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}
