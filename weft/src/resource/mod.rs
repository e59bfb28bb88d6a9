//! Resource records: the loaded form of one declarative action.
//!
//! A resource names itself (`actionId`), its dependencies (`requires`),
//! an optional fan-out list (`items`) and an optional run-block with the
//! side-effecting steps and their gates. Records arrive from the external
//! evaluator as JSON and deserialize into these shapes; every block is
//! optional, so a file of any declared type also loads as the generic
//! resource shape.

mod evaluator;
mod loader;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use evaluator::{EvalError, Evaluator, PklEvaluator};
pub use loader::{LoadError, ResourceLoader};

/// Resource type, inferred from the file's first non-blank directive line
/// (e.g. `amends "package://…/HTTP.pkl"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceType {
    Http,
    Llm,
    Python,
    Exec,
    Data,
    ApiServerResponse,
    /// Generic resource: no recognised directive.
    Resource,
}

impl ResourceType {
    /// Infers the type from the first non-blank line of the file text.
    pub fn infer(text: &str) -> Self {
        let first = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        if first.contains("HTTP.pkl") {
            Self::Http
        } else if first.contains("LLM.pkl") {
            Self::Llm
        } else if first.contains("Python.pkl") {
            Self::Python
        } else if first.contains("Exec.pkl") {
            Self::Exec
        } else if first.contains("Data.pkl") {
            Self::Data
        } else if first.contains("APIServerResponse.pkl") {
            Self::ApiServerResponse
        } else {
            Self::Resource
        }
    }
}

/// A step or evaluator timeout: a bare number is seconds, a string takes
/// a unit suffix (`100.ms`, `30.s`, `1.min`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationSpec {
    Seconds(f64),
    Text(String),
}

impl DurationSpec {
    /// Concrete duration, when the spec parses.
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            Self::Seconds(s) if *s >= 0.0 => Some(Duration::from_secs_f64(*s)),
            Self::Seconds(_) => None,
            Self::Text(text) => {
                let text = text.trim().replace('.', "");
                let split = text.find(|c: char| !c.is_ascii_digit())?;
                let (num, unit) = text.split_at(split);
                let num: u64 = num.parse().ok()?;
                match unit.trim() {
                    "ms" => Some(Duration::from_millis(num)),
                    "s" => Some(Duration::from_secs(num)),
                    "min" => Some(Duration::from_secs(num * 60)),
                    _ => None,
                }
            }
        }
    }
}

/// Shell step declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecBlock {
    pub command: String,
    pub env: BTreeMap<String, String>,
    pub timeout_duration: Option<DurationSpec>,
}

/// Python step declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PythonBlock {
    pub script: String,
    pub env: BTreeMap<String, String>,
    pub timeout_duration: Option<DurationSpec>,
}

/// One role/prompt pair in a chat scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub role: String,
    pub prompt: String,
}

/// LLM chat step declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatBlock {
    pub model: String,
    pub prompt: Option<String>,
    pub scenario: Vec<ChatTurn>,
    pub timeout_duration: Option<DurationSpec>,
}

/// HTTP client step declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpClientBlock {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub data: Option<String>,
    pub timeout_duration: Option<DurationSpec>,
}

/// Error carried by a failing preflight or an API error response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockError {
    pub code: u16,
    pub message: String,
}

/// Preflight gate: all validations must be truthy, else the declared
/// error (or a default 500) fails the resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreflightCheck {
    pub validations: Vec<serde_json::Value>,
    pub error: Option<BlockError>,
}

/// API response payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiResponseBody {
    pub data: Vec<serde_json::Value>,
}

/// Response metadata: extra headers and free-form properties.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiResponseMeta {
    pub headers: BTreeMap<String, String>,
    pub properties: BTreeMap<String, String>,
}

/// API response block: present on at most one resource per request; the
/// orchestrator materialises `response.json` from it exactly once.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiResponseBlock {
    pub success: bool,
    pub response: Option<ApiResponseBody>,
    pub meta: Option<ApiResponseMeta>,
    pub errors: Option<BlockError>,
}

impl Default for ApiResponseBlock {
    fn default() -> Self {
        Self {
            success: true,
            response: None,
            meta: None,
            errors: None,
        }
    }
}

/// The run-block: steps plus their gates and allow-lists.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunBlock {
    pub exec: Option<ExecBlock>,
    pub python: Option<PythonBlock>,
    pub chat: Option<ChatBlock>,
    pub http_client: Option<HttpClientBlock>,
    pub api_response: Option<ApiResponseBlock>,
    pub skip_condition: Vec<serde_json::Value>,
    pub preflight_check: Option<PreflightCheck>,
    pub allowed_params: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub restrict_to_routes: Vec<String>,
    pub restrict_to_http_methods: Vec<String>,
}

/// One loaded resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceRecord {
    pub action_id: String,
    pub requires: Vec<String>,
    pub items: Option<Vec<String>>,
    pub run: Option<RunBlock>,
}

/// Discovery product: canonical action id and the file it loads from.
/// The file path is authoritative for reload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceNodeEntry {
    pub action_id: String,
    pub file: PathBuf,
}

/// Truthiness for declarative gate values: `true`, non-zero numbers and
/// the strings `"true"`/`"1"` count as truthy.
pub(crate) fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s == "1"
        }
        _ => false,
    }
}

/// Walks a resources directory and returns every `.pkl` file in sorted
/// walk order. This order is the tie-break between resources with no
/// dependency relation.
pub fn walk_resource_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file()
            && entry.path().extension().map(|e| e == "pkl").unwrap_or(false)
        {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}
