//! End-to-end resolver scenarios: one request against a temp resources
//! directory, with a YAML-bodied evaluator stub and a mock LLM.

mod init_logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use weft::errors::ActionError;
use weft::llm::{ChatMessage, LlmClient, LlmError, MockLlm};
use weft::reader::PklresReader;
use weft::resource::{EvalError, Evaluator};
use weft::workflow::{Workflow, WorkflowSettings};
use weft::{RequestDescriptor, Resolver, ResolverOptions};

/// Evaluator stub for tests: everything after the `amends` directive line
/// is YAML and renders to the record JSON directly.
struct YamlEvaluator;

#[async_trait]
impl Evaluator for YamlEvaluator {
    async fn evaluate(&self, file: &Path) -> Result<serde_json::Value, EvalError> {
        let text =
            std::fs::read_to_string(file).map_err(|e| EvalError::Launch(e.to_string()))?;
        let body: String = text
            .lines()
            .filter(|l| !l.trim_start().starts_with("amends"))
            .collect::<Vec<_>>()
            .join("\n");
        serde_yaml::from_str(&body).map_err(|e| EvalError::Failed {
            file: file.display().to_string(),
            stderr: e.to_string(),
        })
    }
}

/// LLM client that always fails with a server error.
struct FailingLlm;

#[async_trait]
impl LlmClient for FailingLlm {
    async fn invoke(&self, _model: &str, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        Err(LlmError::Api {
            status: 500,
            body: "upstream exploded".to_string(),
        })
    }
}

struct Harness {
    root: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("resources")).unwrap();
        Self { root }
    }

    fn resources_dir(&self) -> PathBuf {
        self.root.path().join("resources")
    }

    fn run_dir(&self) -> PathBuf {
        self.root.path().join("run")
    }

    fn resource_file(&self, name: &str) -> PathBuf {
        self.resources_dir().join(format!("{}.pkl", name))
    }

    fn write_resource(&self, name: &str, body: &str) {
        std::fs::write(
            self.resource_file(name),
            format!("amends \"package://weft/schema/Resource.pkl\"\n{}", body),
        )
        .unwrap();
    }

    fn workflow(&self, target: &str, api_mode: bool) -> Workflow {
        Workflow {
            agent_id: "demo".to_string(),
            version: "1".to_string(),
            target_action_id: target.to_string(),
            settings: WorkflowSettings {
                api_server_mode: api_mode,
                ..WorkflowSettings::default()
            },
        }
    }

    fn resolver(&self, target: &str) -> Resolver {
        self.resolver_with(target, false, None, Arc::new(MockLlm::new("mock reply")))
    }

    fn resolver_with(
        &self,
        target: &str,
        api_mode: bool,
        request: Option<RequestDescriptor>,
        llm: Arc<dyn LlmClient>,
    ) -> Resolver {
        Resolver::new(ResolverOptions {
            workflow: self.workflow(target, api_mode),
            resources_dir: self.resources_dir(),
            data_dir: self.root.path().join("data"),
            run_dir: self.run_dir(),
            request,
            evaluator: Arc::new(YamlEvaluator),
            llm,
        })
        .unwrap()
        .with_step_timing(Duration::from_millis(10), Duration::from_millis(500))
        .with_item_timing(Duration::from_millis(10), Duration::from_millis(500))
    }

    /// Step output record straight from the durable `pklres` store.
    async fn step_record(&self, action_id: &str, step: &str) -> Option<serde_json::Value> {
        let pklres = PklresReader::new(self.root.path().join("data/pklres.db")).unwrap();
        pklres
            .get(action_id, step)
            .await
            .unwrap()
            .map(|text| serde_json::from_str(&text).unwrap())
    }

    fn assert_request_files_gone(&self, request_id: &str) {
        assert!(!self.run_dir().join(format!("{}.stamp", request_id)).exists());
        assert!(!self.run_dir().join(format!("session_{}.db", request_id)).exists());
        assert!(!self.run_dir().join(format!("items_{}.db", request_id)).exists());
    }
}

/// **Scenario**: a single resource with no run-block is visited once and
/// produces no step output.
#[tokio::test]
async fn single_resource_without_run_counts_one_visit() {
    let h = Harness::new();
    h.write_resource("a", "actionId: a\n");

    let mut resolver = h.resolver("a");
    let request_id = resolver.request_id().to_string();
    let proceed = resolver.handle_run_action().await.unwrap();

    assert!(!proceed);
    assert_eq!(resolver.file_run_counters()[&h.resource_file("a")], 1);
    assert!(h.step_record("@demo/a:1", "exec").await.is_none());
    assert!(resolver.sink().drain(&request_id).is_empty());
    h.assert_request_files_gone(&request_id);
}

/// **Scenario**: C requires B requires A; exec steps run in dependency
/// order, each observing a timestamp change.
#[tokio::test]
async fn linear_chain_runs_execs_in_dependency_order() {
    let h = Harness::new();
    h.write_resource("a", "actionId: a\nrun:\n  exec:\n    command: echo a\n");
    h.write_resource("b", "actionId: b\nrequires: [a]\nrun:\n  exec:\n    command: echo b\n");
    h.write_resource("c", "actionId: c\nrequires: [b]\nrun:\n  exec:\n    command: echo c\n");

    let mut resolver = h.resolver("c");
    resolver.handle_run_action().await.unwrap();

    let ts = |record: &serde_json::Value| record["timestamp"].as_i64().unwrap();
    let a = h.step_record("@demo/a:1", "exec").await.unwrap();
    let b = h.step_record("@demo/b:1", "exec").await.unwrap();
    let c = h.step_record("@demo/c:1", "exec").await.unwrap();

    assert!(a["stdout"].as_str().unwrap().contains('a'));
    assert!(ts(&a) <= ts(&b));
    assert!(ts(&b) <= ts(&c));
    for record in [&a, &b, &c] {
        assert_eq!(record["exitCode"], serde_json::json!(0));
    }
}

/// **Scenario**: dependency once, iterated resource once per item, item
/// store gone afterwards, response materialised exactly once.
#[tokio::test]
async fn iterated_resource_runs_once_per_item() {
    let h = Harness::new();
    h.write_resource("a", "actionId: a\nrun:\n  exec:\n    command: echo dep\n");
    h.write_resource(
        "b",
        concat!(
            "actionId: b\n",
            "requires: [a]\n",
            "items: [x, y]\n",
            "run:\n",
            "  exec:\n",
            "    command: echo item\n",
            "  apiResponse:\n",
            "    success: true\n",
            "    response:\n",
            "      data: [done]\n",
        ),
    );

    let mut resolver = h.resolver("b");
    let request_id = resolver.request_id().to_string();
    let response_path = resolver.response_path().to_path_buf();
    resolver.handle_run_action().await.unwrap();

    assert_eq!(resolver.file_run_counters()[&h.resource_file("a")], 1);
    assert_eq!(resolver.file_run_counters()[&h.resource_file("b")], 2);
    h.assert_request_files_gone(&request_id);

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&response_path).unwrap()).unwrap();
    assert_eq!(doc["success"], serde_json::json!(true));
    assert_eq!(doc["response"]["data"][0], serde_json::json!("done"));
}

/// **Scenario**: failing preflight records the declared code and message
/// and no step handler runs.
#[tokio::test]
async fn preflight_failure_is_recorded_and_skips_steps() {
    let h = Harness::new();
    h.write_resource(
        "a",
        concat!(
            "actionId: a\n",
            "run:\n",
            "  preflightCheck:\n",
            "    validations: [false]\n",
            "    error:\n",
            "      code: 418\n",
            "      message: teapot\n",
            "  exec:\n",
            "    command: echo never\n",
        ),
    );

    let mut resolver = h.resolver("a");
    let request_id = resolver.request_id().to_string();
    resolver.handle_run_action().await.unwrap();

    let errors = resolver.sink().drain(&request_id);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, 418);
    assert!(errors[0].message.contains("teapot: @demo/a:1"));
    assert_eq!(errors[0].action_id.as_deref(), Some("@demo/a:1"));
    assert!(h.step_record("@demo/a:1", "exec").await.is_none());
}

/// **Scenario**: a hung command is bounded by the step's declared
/// timeout, not the 60 s default.
#[tokio::test]
async fn hung_exec_times_out_within_the_declared_bound() {
    let h = Harness::new();
    h.write_resource(
        "a",
        concat!(
            "actionId: a\n",
            "run:\n",
            "  exec:\n",
            "    command: sleep 5\n",
            "    timeoutDuration: 100.ms\n",
        ),
    );

    let mut resolver = h.resolver("a");
    let request_id = resolver.request_id().to_string();
    let started = Instant::now();
    resolver.handle_run_action().await.unwrap();
    let elapsed = started.elapsed();

    let errors = resolver.sink().drain(&request_id);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, 500);
    assert!(errors[0].message.contains("timed out"));
    assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
}

/// **Scenario**: a pre-seeded error bag keeps the HTTP handler from ever
/// being invoked, but the response resource still composes.
#[tokio::test]
async fn preseeded_errors_skip_handlers_but_compose_response() {
    let h = Harness::new();
    h.write_resource(
        "h",
        concat!(
            "actionId: h\n",
            "run:\n",
            "  httpClient:\n",
            "    method: GET\n",
            "    url: http://127.0.0.1:1/unreachable\n",
            "  apiResponse:\n",
            "    success: true\n",
        ),
    );

    let mut resolver = h.resolver("h");
    let request_id = resolver.request_id().to_string();
    let response_path = resolver.response_path().to_path_buf();
    resolver.sink().append(
        &request_id,
        ActionError {
            code: 500,
            message: "earlier failure".to_string(),
            action_id: None,
        },
    );

    resolver.handle_run_action().await.unwrap();

    assert!(h.step_record("@demo/h:1", "client").await.is_none());
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&response_path).unwrap()).unwrap();
    assert_eq!(doc["success"], serde_json::json!(false));
    assert_eq!(doc["errors"][0]["message"], serde_json::json!("earlier failure"));
}

/// **Scenario**: a dependency cycle fails the request before any step
/// runs.
#[tokio::test]
async fn cyclic_dependencies_fail_before_any_step() {
    let h = Harness::new();
    h.write_resource("a", "actionId: a\nrequires: [b]\nrun:\n  exec:\n    command: echo a\n");
    h.write_resource("b", "actionId: b\nrequires: [a]\nrun:\n  exec:\n    command: echo b\n");

    let mut resolver = h.resolver("a");
    let request_id = resolver.request_id().to_string();
    let err = resolver.handle_run_action().await.unwrap_err();

    assert!(err.to_string().contains("cyclic dependency"));
    assert!(h.step_record("@demo/a:1", "exec").await.is_none());
    assert!(h.step_record("@demo/b:1", "exec").await.is_none());
    h.assert_request_files_gone(&request_id);
}

/// **Scenario**: request-scoped files are removed on the failure path
/// too.
#[tokio::test]
async fn cleanup_runs_on_failure_paths() {
    let h = Harness::new();
    // Discovery fails: the file body is not a record.
    std::fs::write(h.resource_file("broken"), "amends \"x\"\n- just\n- a\n- list\n").unwrap();

    let mut resolver = h.resolver("broken");
    let request_id = resolver.request_id().to_string();
    assert!(resolver.handle_run_action().await.is_err());
    h.assert_request_files_gone(&request_id);
}

/// **Scenario**: a chat failure is request-terminal; downstream resources
/// skip their handlers.
#[tokio::test]
async fn chat_failure_fails_fast_for_downstream_resources() {
    let h = Harness::new();
    h.write_resource(
        "c",
        concat!(
            "actionId: c\n",
            "run:\n",
            "  chat:\n",
            "    model: test-model\n",
            "    prompt: say hi\n",
        ),
    );
    h.write_resource("d", "actionId: d\nrequires: [c]\nrun:\n  exec:\n    command: echo d\n");

    let mut resolver = h.resolver_with("d", false, None, Arc::new(FailingLlm));
    let request_id = resolver.request_id().to_string();
    resolver.handle_run_action().await.unwrap();

    let errors = resolver.sink().drain(&request_id);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("llm"));
    assert!(h.step_record("@demo/d:1", "exec").await.is_none());
}

/// **Scenario**: API mode rejects a `request.params` literal that is not
/// allow-listed; the error is a 400.
#[tokio::test]
async fn api_mode_rejects_undeclared_params() {
    let h = Harness::new();
    h.write_resource(
        "a",
        concat!(
            "actionId: a\n",
            "# reads request.params(\"secret\")\n",
            "run:\n",
            "  exec:\n",
            "    command: echo a\n",
        ),
    );

    let request = RequestDescriptor::new("/api/v1/items", "GET");
    let mut resolver = h.resolver_with("a", true, Some(request), Arc::new(MockLlm::new("x")));
    let request_id = resolver.request_id().to_string();
    resolver.handle_run_action().await.unwrap();

    let errors = resolver.sink().drain(&request_id);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, 400);
    assert!(errors[0].message.contains("secret"));
    assert!(h.step_record("@demo/a:1", "exec").await.is_none());
}

/// **Scenario**: a route restriction miss is a silent skip, not an error.
#[tokio::test]
async fn api_mode_route_mismatch_skips_silently() {
    let h = Harness::new();
    h.write_resource(
        "a",
        concat!(
            "actionId: a\n",
            "run:\n",
            "  restrictToRoutes: [/api/v1/other]\n",
            "  exec:\n",
            "    command: echo a\n",
        ),
    );

    let request = RequestDescriptor::new("/api/v1/items", "GET");
    let mut resolver = h.resolver_with("a", true, Some(request), Arc::new(MockLlm::new("x")));
    let request_id = resolver.request_id().to_string();
    resolver.handle_run_action().await.unwrap();

    assert!(resolver.sink().drain(&request_id).is_empty());
    assert!(h.step_record("@demo/a:1", "exec").await.is_none());
    assert_eq!(resolver.file_run_counters()[&h.resource_file("a")], 1);
}

/// **Scenario**: running the same iterated resource in two sessions gives
/// the same per-file run counts and leaves no item store behind.
#[tokio::test]
async fn repeated_iteration_is_idempotent() {
    let h = Harness::new();
    h.write_resource(
        "b",
        concat!(
            "actionId: b\n",
            "items: [x, y, z]\n",
            "run:\n",
            "  exec:\n",
            "    command: echo item\n",
        ),
    );

    let mut counts = Vec::new();
    for _ in 0..2 {
        let mut resolver = h.resolver("b");
        let request_id = resolver.request_id().to_string();
        resolver.handle_run_action().await.unwrap();
        counts.push(resolver.file_run_counters()[&h.resource_file("b")]);
        h.assert_request_files_gone(&request_id);
    }
    assert_eq!(counts, vec![3, 3]);
}

/// **Scenario**: within one resource, declared steps run in the fixed
/// order (exec before chat).
#[tokio::test]
async fn multi_step_resource_runs_exec_before_chat() {
    let h = Harness::new();
    h.write_resource(
        "m",
        concat!(
            "actionId: m\n",
            "run:\n",
            "  chat:\n",
            "    model: test-model\n",
            "    prompt: summarise\n",
            "  exec:\n",
            "    command: echo first\n",
        ),
    );

    let mut resolver = h.resolver("m");
    resolver.handle_run_action().await.unwrap();

    let exec = h.step_record("@demo/m:1", "exec").await.unwrap();
    let llm = h.step_record("@demo/m:1", "llm").await.unwrap();
    assert!(exec["timestamp"].as_i64().unwrap() <= llm["timestamp"].as_i64().unwrap());
}

/// **Scenario**: a chat step against the mock LLM publishes the reply
/// for downstream resources to read.
#[tokio::test]
async fn chat_step_publishes_the_reply() {
    let h = Harness::new();
    h.write_resource(
        "c",
        concat!(
            "actionId: c\n",
            "run:\n",
            "  chat:\n",
            "    model: test-model\n",
            "    scenario:\n",
            "      - role: system\n",
            "        prompt: you are terse\n",
            "    prompt: say hi\n",
        ),
    );

    let mut resolver = h.resolver("c");
    resolver.handle_run_action().await.unwrap();

    let record = h.step_record("@demo/c:1", "llm").await.unwrap();
    assert_eq!(record["response"], serde_json::json!("mock reply"));
    assert_eq!(record["model"], serde_json::json!("test-model"));
}
