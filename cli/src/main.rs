//! Weft CLI binary: resolve one workflow action from the command line.
//!
//! Loads the workflow, opens a resolver session against the resources
//! directory, runs the target action, and prints the composed response
//! (or the accumulated errors) as JSON.

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use weft::llm::{LlmClient, MockLlm, OpenAiCompatClient};
use weft::resource::{Evaluator, PklEvaluator};
use weft::{RequestDescriptor, Resolver, ResolverOptions, Workflow};

#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(about = "Weft — dependency-ordered agent action resolver")]
struct Args {
    /// Workflow file (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    workflow: PathBuf,

    /// Directory of .pkl resource files
    #[arg(short, long, value_name = "DIR")]
    resources: PathBuf,

    /// Override the workflow's target action id
    #[arg(short, long, value_name = "ID")]
    target: Option<String>,

    /// Force API-server mode regardless of workflow settings
    #[arg(long)]
    api_mode: bool,

    /// Request path (API-server mode)
    #[arg(long, value_name = "PATH", default_value = "/")]
    path: String,

    /// Request method (API-server mode)
    #[arg(long, value_name = "METHOD", default_value = "GET")]
    method: String,

    /// Request query param as key=value; repeatable (API-server mode)
    #[arg(long = "param", value_name = "K=V")]
    params: Vec<String>,

    /// Request header as key=value; repeatable (API-server mode)
    #[arg(long = "header", value_name = "K=V")]
    headers: Vec<String>,

    /// Request body (API-server mode)
    #[arg(long, value_name = "TEXT")]
    data: Option<String>,

    /// Path to the pkl binary (default: discover on PATH, or WEFT_PKL_BIN)
    #[arg(long, value_name = "BIN", env = "WEFT_PKL_BIN")]
    pkl_binary: Option<PathBuf>,

    /// Use a fixed-reply LLM instead of the configured endpoint
    #[arg(long, value_name = "REPLY")]
    mock_llm: Option<String>,

    /// Pretty-print the response JSON
    #[arg(long)]
    pretty: bool,

    /// Verbose: debug logging for weft
    #[arg(short, long)]
    verbose: bool,
}

fn parse_pair(raw: &str) -> Option<(String, String)> {
    let (k, v) = raw.split_once('=')?;
    let k = k.trim();
    if k.is_empty() {
        return None;
    }
    Some((k.to_string(), v.trim().to_string()))
}

fn build_request(args: &Args) -> RequestDescriptor {
    let mut request = RequestDescriptor::new(&args.path, &args.method);
    for raw in &args.params {
        match parse_pair(raw) {
            Some((k, v)) => {
                request.params.insert(k, v);
            }
            None => tracing::warn!(raw = raw.as_str(), "ignoring malformed --param"),
        }
    }
    for raw in &args.headers {
        match parse_pair(raw) {
            Some((k, v)) => {
                request.headers.insert(k, v);
            }
            None => tracing::warn!(raw = raw.as_str(), "ignoring malformed --header"),
        }
    }
    if let Some(data) = &args.data {
        request.data = data.clone().into_bytes();
    }
    request
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut workflow = Workflow::from_file(&args.workflow)?;
    if let Some(target) = &args.target {
        workflow.target_action_id = target.clone();
    }
    if args.api_mode {
        workflow.settings.api_server_mode = true;
    }

    let evaluator: Arc<dyn Evaluator> = match &args.pkl_binary {
        Some(bin) => Arc::new(PklEvaluator::with_binary(bin)),
        None => Arc::new(PklEvaluator::discover()?),
    };
    let llm: Arc<dyn LlmClient> = match &args.mock_llm {
        Some(reply) => Arc::new(MockLlm::new(reply)),
        None => Arc::new(OpenAiCompatClient::from_env()),
    };

    let request = workflow
        .api_server_mode()
        .then(|| build_request(&args));

    let paths = config::RuntimePaths::resolve();
    let mut resolver = Resolver::new(ResolverOptions {
        workflow,
        resources_dir: args.resources.clone(),
        data_dir: paths.data_dir,
        run_dir: paths.run_dir,
        request,
        evaluator,
        llm,
    })?;
    let sink = resolver.sink();
    let request_id = resolver.request_id().to_string();
    let response_path = resolver.response_path().to_path_buf();

    let run_result = resolver.handle_run_action().await;

    let errors = sink.drain(&request_id);
    // No resource composed a response artefact: report the outcome
    // directly from the drained sink.
    let document = match std::fs::read_to_string(&response_path) {
        Ok(text) => serde_json::from_str(&text)?,
        Err(_) => serde_json::json!({
            "success": errors.is_empty(),
            "errors": errors,
        }),
    };
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&document)?
    } else {
        serde_json::to_string(&document)?
    };
    println!("{}", rendered);

    match run_result {
        Ok(_) if errors.is_empty() => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::from(1)),
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            Ok(ExitCode::from(1))
        }
    }
}


#[tokio::main]
async fn main() -> ExitCode {
    // Config before arg parsing so `.env`/XDG values feed env-backed args.
    if let Err(e) = config::load_and_apply("weft", None) {
        eprintln!("weft: config load failed, continuing with process env: {}", e);
    }
    let args = Args::parse();
    logging::init(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("weft: {}", e);
            ExitCode::from(2)
        }
    }
}
