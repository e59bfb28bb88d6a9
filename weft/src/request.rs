//! API-mode request descriptor.
//!
//! In API-server mode the ingress hands the resolver one pre-populated
//! request: path, method, client IP, headers, query params and body. The
//! loader publishes these fields into `pklres` so reloaded resources can
//! template against them, and the run-block processor validates declared
//! params/headers against the resource's allow-lists.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One HTTP request as seen by the resolver.
///
/// Header and param maps are ordered so the published JSON is stable
/// across reloads of the same request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestDescriptor {
    /// Request id assigned by the ingress; keys the error sink and the
    /// per-request reader files.
    pub id: String,
    /// URL path (e.g. `/api/v1/chat`).
    pub path: String,
    /// HTTP method, upper-case.
    pub method: String,
    /// Client IP as reported by the ingress.
    pub ip: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    /// Raw request body.
    pub data: Vec<u8>,
}

impl RequestDescriptor {
    /// Builds a descriptor with a fresh v4 request id.
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.into(),
            method: method.into().to_uppercase(),
            ..Self::default()
        }
    }

    /// Headers as a JSON object string, for publication to `pklres`.
    pub fn headers_json(&self) -> String {
        serde_json::to_string(&self.headers).unwrap_or_else(|_| "{}".to_string())
    }

    /// Params as a JSON object string, for publication to `pklres`.
    pub fn params_json(&self) -> String {
        serde_json::to_string(&self.params).unwrap_or_else(|_| "{}".to_string())
    }

    /// Body as text; non-UTF-8 bytes are replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
