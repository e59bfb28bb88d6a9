//! Default step executors.
//!
//! One executor per step kind, all satisfying the uniform handler
//! contract: do the work, then publish an output record (with a fresh
//! timestamp) through `pklres`. The step driver only watches the
//! timestamp, so an executor is free to record failure detail (exit
//! codes, HTTP status) in the record without failing the step; a handler
//! error is reserved for work that could not be dispatched or completed
//! at all.
//!
//! Every executor bounds its own blocking work with the step's declared
//! timeout (default 60 s), so a hung subprocess or request cannot stall
//! the driver past its deadline.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::llm::{ChatMessage, LlmClient};
use crate::reader::PklresReader;
use crate::resource::{ChatBlock, ExecBlock, HttpClientBlock, PythonBlock};

use super::step::{
    publish_step_output, HandlerError, STEP_CLIENT, STEP_EXEC, STEP_LLM, STEP_PYTHON,
};

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// The executor set for one resolver session.
pub struct StepHandlers {
    pklres: Arc<PklresReader>,
    http: reqwest::Client,
    llm: Arc<dyn LlmClient>,
}

impl StepHandlers {
    pub fn new(pklres: Arc<PklresReader>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            pklres,
            http: reqwest::Client::new(),
            llm,
        }
    }

    /// Runs a shell command (`sh -c` on Unix, `cmd /C` on Windows) and
    /// publishes exit code, stdout and stderr.
    pub async fn run_exec(
        &self,
        resource_id: &str,
        block: &ExecBlock,
        timeout: Option<Duration>,
    ) -> Result<(), HandlerError> {
        if block.command.trim().is_empty() {
            return Err("exec block declares no command".into());
        }
        let timeout = timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);

        let mut cmd = shell_command(&block.command);
        cmd.envs(&block.env);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| format!("command timed out after {:?}", timeout))?
            .map_err(|e| format!("failed to run command: {}", e))?;

        let mut fields = serde_json::Map::new();
        fields.insert("command".into(), json!(block.command));
        fields.insert("exitCode".into(), json!(output.status.code()));
        fields.insert(
            "stdout".into(),
            json!(String::from_utf8_lossy(&output.stdout).into_owned()),
        );
        fields.insert(
            "stderr".into(),
            json!(String::from_utf8_lossy(&output.stderr).into_owned()),
        );
        publish_step_output(&self.pklres, resource_id, STEP_EXEC, fields).await?;
        Ok(())
    }

    /// Runs an inline Python script via `python3 -c` and publishes exit
    /// code, stdout and stderr.
    pub async fn run_python(
        &self,
        resource_id: &str,
        block: &PythonBlock,
        timeout: Option<Duration>,
    ) -> Result<(), HandlerError> {
        if block.script.trim().is_empty() {
            return Err("python block declares no script".into());
        }
        let timeout = timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);

        let mut cmd = tokio::process::Command::new("python3");
        cmd.arg("-c").arg(&block.script);
        cmd.envs(&block.env);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| format!("script timed out after {:?}", timeout))?
            .map_err(|e| format!("failed to run python3: {}", e))?;

        let mut fields = serde_json::Map::new();
        fields.insert("exitCode".into(), json!(output.status.code()));
        fields.insert(
            "stdout".into(),
            json!(String::from_utf8_lossy(&output.stdout).into_owned()),
        );
        fields.insert(
            "stderr".into(),
            json!(String::from_utf8_lossy(&output.stderr).into_owned()),
        );
        publish_step_output(&self.pklres, resource_id, STEP_PYTHON, fields).await?;
        Ok(())
    }

    /// Invokes the LLM with the block's scenario plus prompt and
    /// publishes the assistant text. Any client failure (including a 5xx
    /// from the API) is a handler error; the caller escalates chat
    /// failures to request-terminal.
    pub async fn run_chat(
        &self,
        resource_id: &str,
        block: &ChatBlock,
        timeout: Option<Duration>,
    ) -> Result<(), HandlerError> {
        let mut messages: Vec<ChatMessage> = block
            .scenario
            .iter()
            .map(|turn| ChatMessage::new(&turn.role, &turn.prompt))
            .collect();
        if let Some(prompt) = &block.prompt {
            messages.push(ChatMessage::new("user", prompt));
        }
        if messages.is_empty() {
            return Err("chat block declares no prompt or scenario".into());
        }
        let timeout = timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);

        let response = tokio::time::timeout(timeout, self.llm.invoke(&block.model, &messages))
            .await
            .map_err(|_| format!("chat timed out after {:?}", timeout))??;

        let mut fields = serde_json::Map::new();
        fields.insert("model".into(), json!(block.model));
        fields.insert("response".into(), json!(response));
        publish_step_output(&self.pklres, resource_id, STEP_LLM, fields).await?;
        Ok(())
    }

    /// Sends the declared HTTP request and publishes status and body.
    /// Transport failures are handler errors; non-2xx statuses are
    /// recorded in the output for downstream resources to inspect.
    pub async fn run_http(
        &self,
        resource_id: &str,
        block: &HttpClientBlock,
        timeout: Option<Duration>,
    ) -> Result<(), HandlerError> {
        if block.url.trim().is_empty() {
            return Err("http client block declares no url".into());
        }
        let method: reqwest::Method = block
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| format!("invalid http method: {}", block.method))?;
        let timeout = timeout.unwrap_or(DEFAULT_STEP_TIMEOUT);

        let mut req = self
            .http
            .request(method.clone(), &block.url)
            .timeout(timeout);
        for (name, value) in &block.headers {
            req = req.header(name, value);
        }
        if !block.params.is_empty() {
            req = req.query(&block.params);
        }
        if let Some(data) = &block.data {
            req = req.body(data.clone());
        }

        let response = req
            .send()
            .await
            .map_err(|e| format!("http request failed: {}", e))?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        let mut fields = serde_json::Map::new();
        fields.insert("url".into(), json!(block.url));
        fields.insert("method".into(), json!(method.as_str()));
        fields.insert("statusCode".into(), json!(status));
        fields.insert("body".into(), json!(body));
        publish_step_output(&self.pklres, resource_id, STEP_CLIENT, fields).await?;
        Ok(())
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn temp_handlers() -> (StepHandlers, Arc<PklresReader>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pklres = Arc::new(PklresReader::new(dir.path().join("pklres.db")).unwrap());
        let handlers = StepHandlers::new(pklres.clone(), Arc::new(MockLlm::new("mock reply")));
        (handlers, pklres, dir)
    }

    async fn record(pklres: &PklresReader, resource_id: &str, step: &str) -> serde_json::Value {
        let text = pklres.get(resource_id, step).await.unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn exec_publishes_stdout_and_exit_code() {
        let (handlers, pklres, _dir) = temp_handlers();
        let block = ExecBlock {
            command: "echo hello".to_string(),
            ..ExecBlock::default()
        };
        handlers.run_exec("@a/x:1", &block, None).await.unwrap();

        let out = record(&pklres, "@a/x:1", STEP_EXEC).await;
        assert_eq!(out["exitCode"], json!(0));
        assert!(out["stdout"].as_str().unwrap().contains("hello"));
        assert!(out["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn exec_records_nonzero_exit_without_failing() {
        let (handlers, pklres, _dir) = temp_handlers();
        let block = ExecBlock {
            command: "exit 3".to_string(),
            ..ExecBlock::default()
        };
        handlers.run_exec("@a/x:1", &block, None).await.unwrap();
        let out = record(&pklres, "@a/x:1", STEP_EXEC).await;
        assert_eq!(out["exitCode"], json!(3));
    }

    #[tokio::test]
    async fn exec_applies_declared_env() {
        let (handlers, pklres, _dir) = temp_handlers();
        let mut block = ExecBlock {
            command: "echo $GREETING".to_string(),
            ..ExecBlock::default()
        };
        block.env.insert("GREETING".into(), "bonjour".into());
        handlers.run_exec("@a/x:1", &block, None).await.unwrap();
        let out = record(&pklres, "@a/x:1", STEP_EXEC).await;
        assert!(out["stdout"].as_str().unwrap().contains("bonjour"));
    }

    #[tokio::test]
    async fn exec_without_command_is_a_handler_error() {
        let (handlers, _pklres, _dir) = temp_handlers();
        let err = handlers
            .run_exec("@a/x:1", &ExecBlock::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no command"));
    }

    #[tokio::test]
    async fn exec_times_out_on_hung_command() {
        let (handlers, _pklres, _dir) = temp_handlers();
        let block = ExecBlock {
            command: "sleep 5".to_string(),
            ..ExecBlock::default()
        };
        let err = handlers
            .run_exec("@a/x:1", &block, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn chat_publishes_the_assistant_reply() {
        let (handlers, pklres, _dir) = temp_handlers();
        let block = ChatBlock {
            model: "test-model".to_string(),
            prompt: Some("say hi".to_string()),
            ..ChatBlock::default()
        };
        handlers.run_chat("@a/x:1", &block, None).await.unwrap();
        let out = record(&pklres, "@a/x:1", STEP_LLM).await;
        assert_eq!(out["response"], json!("mock reply"));
        assert_eq!(out["model"], json!("test-model"));
    }

    #[tokio::test]
    async fn chat_without_prompt_or_scenario_is_a_handler_error() {
        let (handlers, _pklres, _dir) = temp_handlers();
        let block = ChatBlock {
            model: "m".to_string(),
            ..ChatBlock::default()
        };
        assert!(handlers.run_chat("@a/x:1", &block, None).await.is_err());
    }

    #[tokio::test]
    async fn http_with_invalid_method_is_a_handler_error() {
        let (handlers, _pklres, _dir) = temp_handlers();
        let block = HttpClientBlock {
            method: "NOT A METHOD".to_string(),
            url: "http://127.0.0.1:1/".to_string(),
            ..HttpClientBlock::default()
        };
        let err = handlers.run_http("@a/x:1", &block, None).await.unwrap_err();
        assert!(err.to_string().contains("invalid http method"));
    }

    #[tokio::test]
    async fn http_transport_failure_is_a_handler_error() {
        let (handlers, _pklres, _dir) = temp_handlers();
        let block = HttpClientBlock {
            method: "GET".to_string(),
            url: "http://127.0.0.1:1/unreachable".to_string(),
            ..HttpClientBlock::default()
        };
        let err = handlers.run_http("@a/x:1", &block, None).await.unwrap_err();
        assert!(err.to_string().contains("http request failed"));
    }
}
