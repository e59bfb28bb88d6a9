//! API-mode request validation.
//!
//! A resource's file text declares which request params and headers it
//! reads (`request.params("X")`, `request.header("X")`); both must appear
//! in the resource's allow-lists. Route and method restrictions are
//! different: a mismatch there skips the resource silently, so one
//! resources directory can serve several routes, while an undeclared
//! param or header is a hard 400.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::ResolverError;
use crate::request::RequestDescriptor;
use crate::resource::RunBlock;

/// Outcome of validating one resource against the request.
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// All gates passed; the resource may run.
    Proceed,
    /// Route or method restriction did not match; skip without error.
    Skip,
}

fn params_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"request\.params\("([^"]+)"\)"#).unwrap())
}

fn header_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"request\.header\("([^"]+)"\)"#).unwrap())
}

fn extract<'t>(re: &Regex, text: &'t str) -> Vec<&'t str> {
    re.captures_iter(text)
        .map(|c| c.get(1).map(|m| m.as_str()).unwrap_or(""))
        .collect()
}

fn allowed(list: &[String], name: &str) -> bool {
    list.iter().any(|a| a.eq_ignore_ascii_case(name))
}

/// Validates the resource's file text and restrictions against the
/// request.
///
/// Checks in order: param literals against `allowed_params`, header
/// literals against `allowed_headers` (each miss is a 400 error), then
/// route and method restrictions (each miss is a silent skip).
pub fn validate_request(
    file_text: &str,
    run: &RunBlock,
    request: &RequestDescriptor,
) -> Result<ValidationOutcome, ResolverError> {
    for name in extract(params_pattern(), file_text) {
        if !allowed(&run.allowed_params, name) {
            return Err(ResolverError::ParamNotAllowed(name.to_string()));
        }
    }
    for name in extract(header_pattern(), file_text) {
        if !allowed(&run.allowed_headers, name) {
            return Err(ResolverError::HeaderNotAllowed(name.to_string()));
        }
    }

    if !run.restrict_to_routes.is_empty()
        && !run
            .restrict_to_routes
            .iter()
            .any(|r| r.eq_ignore_ascii_case(&request.path))
    {
        return Ok(ValidationOutcome::Skip);
    }
    if !run.restrict_to_http_methods.is_empty()
        && !run
            .restrict_to_http_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&request.method))
    {
        return Ok(ValidationOutcome::Skip);
    }

    Ok(ValidationOutcome::Proceed)
}
