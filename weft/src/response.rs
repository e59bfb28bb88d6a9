//! Response artefact composition.
//!
//! When a resource declares an `apiResponse` block, the orchestrator
//! materialises the request-scoped `response.json` from it exactly once
//! for that resource, folding in every error the request accumulated.
//! The caller (ingress) serves the file and clears the sink.

use std::path::Path;

use serde::Serialize;

use crate::errors::ActionError;
use crate::resource::ApiResponseBlock;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResponseDocument<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<&'a crate::resource::ApiResponseBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<&'a crate::resource::ApiResponseMeta>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<ActionError>,
}

/// Builds the response document: the block's payload when the request
/// succeeded, the accumulated errors otherwise. A declared block error
/// is folded in ahead of the sink's entries.
pub fn compose_response(
    block: Option<&ApiResponseBlock>,
    sink_errors: &[ActionError],
) -> serde_json::Value {
    let mut errors: Vec<ActionError> = Vec::new();
    if let Some(declared) = block.and_then(|b| b.errors.as_ref()) {
        errors.push(ActionError {
            code: declared.code,
            message: declared.message.clone(),
            action_id: None,
        });
    }
    errors.extend(sink_errors.iter().cloned());

    let success = errors.is_empty() && block.map(|b| b.success).unwrap_or(false);
    let document = ResponseDocument {
        success,
        response: block.and_then(|b| b.response.as_ref()),
        meta: block.and_then(|b| b.meta.as_ref()),
        errors,
    };
    serde_json::to_value(&document).unwrap_or_else(|_| serde_json::json!({"success": false}))
}

/// Writes the composed document to the request-scoped response path.
pub fn write_response(
    path: &Path,
    block: Option<&ApiResponseBlock>,
    sink_errors: &[ActionError],
) -> std::io::Result<()> {
    let document = compose_response(block, sink_errors);
    let text = serde_json::to_string_pretty(&document).map_err(std::io::Error::other)?;
    std::fs::write(path, format!("{}\n", text))
}
