//! URI-addressable readers over SQLite.
//!
//! Six namespaces share one capability: `read(uri) -> bytes`. The URI
//! scheme picks the store, `op` and the remaining query parameters pick
//! the operation:
//!
//! - `memory://?op=get|set&key=…[&value=…]` — durable KV.
//! - `session://?op=get|set|clear&key=…[&value=…]` — per-request KV.
//! - `tool://?op=get|set&key=…[&value=…]` — opaque passthrough for steps.
//! - `item://?op=set|list|clear[&value=…]` — iteration state.
//! - `agent://?op=resolve&agent=A&version=V` + path `/<short>` — canonical id.
//! - `pklres://?op=get|set&collection=C&key=K[&value=V]` — step output cache.
//!
//! Readers are created at orchestrator start and shared by reference; the
//! session-scoped stores (`session`, `item`) live in per-request files
//! that [`Readers::close`] removes.

mod agent;
mod item;
mod kv;
mod pklres;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use agent::AgentReader;
pub use item::ItemReader;
pub use pklres::PklresReader;

use kv::SqliteKv;

/// Reader failure.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Underlying SQLite operation failed.
    #[error("storage: {0}")]
    Storage(String),
    /// The URI did not parse or is missing a required part.
    #[error("invalid reader uri: {0}")]
    InvalidUri(String),
    /// No reader is registered for the scheme.
    #[error("unknown reader scheme: {0}")]
    UnknownScheme(String),
    /// The scheme does not support the requested op.
    #[error("unsupported op {op} for scheme {scheme}")]
    UnsupportedOp { scheme: String, op: String },
}

/// A parsed reader URI: scheme, path (no leading slash) and query map,
/// with `op` pulled out.
#[derive(Clone, Debug)]
pub struct ReadUri {
    pub scheme: String,
    pub path: String,
    pub op: String,
    pub params: BTreeMap<String, String>,
}

impl ReadUri {
    /// Parses `scheme://[host]/path?op=…&k=v`.
    pub fn parse(raw: &str) -> Result<Self, ReaderError> {
        let url = url::Url::parse(raw).map_err(|e| ReaderError::InvalidUri(format!("{}: {}", raw, e)))?;
        let mut params = BTreeMap::new();
        for (k, v) in url.query_pairs() {
            params.insert(k.into_owned(), v.into_owned());
        }
        let op = params.remove("op").unwrap_or_default();
        Ok(Self {
            scheme: url.scheme().to_string(),
            path: url.path().trim_start_matches('/').to_string(),
            op,
            params,
        })
    }

    /// Named query parameter, when present.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Named query parameter, or an `InvalidUri` error naming it.
    pub fn require(&self, name: &str) -> Result<&str, ReaderError> {
        self.param(name)
            .ok_or_else(|| ReaderError::InvalidUri(format!("{}:// is missing {}", self.scheme, name)))
    }

    fn unsupported_op(&self) -> ReaderError {
        ReaderError::UnsupportedOp {
            scheme: self.scheme.clone(),
            op: self.op.clone(),
        }
    }
}

/// A URI-addressable store.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Scheme this reader serves (e.g. `memory`).
    fn scheme(&self) -> &'static str;

    /// Executes the operation the URI describes and returns its payload.
    async fn read(&self, uri: &ReadUri) -> Result<Vec<u8>, ReaderError>;
}

/// Flat KV reader used for the `memory`, `session` and `tool` namespaces.
///
/// The three differ only in file location, lifetime and supported ops;
/// `clear` is accepted only where enabled (session).
pub struct KvReader {
    scheme: &'static str,
    kv: SqliteKv,
    allow_clear: bool,
}

impl KvReader {
    fn open(
        scheme: &'static str,
        path: impl AsRef<Path>,
        allow_clear: bool,
    ) -> Result<Self, ReaderError> {
        Ok(Self {
            scheme,
            kv: SqliteKv::new(path)?,
            allow_clear,
        })
    }

    pub fn db_path(&self) -> &Path {
        self.kv.db_path()
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ReaderError> {
        self.kv.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), ReaderError> {
        self.kv.set(key, value).await
    }
}

#[async_trait]
impl Reader for KvReader {
    fn scheme(&self) -> &'static str {
        self.scheme
    }

    async fn read(&self, uri: &ReadUri) -> Result<Vec<u8>, ReaderError> {
        match uri.op.as_str() {
            "get" => {
                let key = uri.require("key")?;
                Ok(self.kv.get(key).await?.unwrap_or_default().into_bytes())
            }
            "set" => {
                let key = uri.require("key")?;
                let value = uri.require("value")?;
                self.kv.set(key, value).await?;
                Ok(Vec::new())
            }
            "clear" if self.allow_clear => {
                match uri.param("key") {
                    Some(key) => self.kv.delete(key).await?,
                    None => self.kv.clear().await?,
                }
                Ok(Vec::new())
            }
            _ => Err(uri.unsupported_op()),
        }
    }
}

/// The full reader set owned by one orchestrator run.
///
/// `memory`, `tool` and `pklres` are durable files under the data dir;
/// `session` and `item` are per-request files under the run dir, removed
/// by [`Readers::close`].
pub struct Readers {
    pub memory: Arc<KvReader>,
    pub session: Arc<KvReader>,
    pub tool: Arc<KvReader>,
    pub item: Arc<ItemReader>,
    pub agent: Arc<AgentReader>,
    pub pklres: Arc<PklresReader>,
    session_files: Vec<PathBuf>,
}

impl Readers {
    /// Opens every store for one request.
    pub fn open(
        data_dir: &Path,
        run_dir: &Path,
        request_id: &str,
        agent_id: &str,
        agent_version: &str,
    ) -> Result<Self, ReaderError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| ReaderError::Storage(format!("create data dir: {}", e)))?;
        std::fs::create_dir_all(run_dir)
            .map_err(|e| ReaderError::Storage(format!("create run dir: {}", e)))?;

        let session_path = run_dir.join(format!("session_{}.db", request_id));
        let item_path = run_dir.join(format!("items_{}.db", request_id));

        Ok(Self {
            memory: Arc::new(KvReader::open("memory", data_dir.join("memory.db"), false)?),
            session: Arc::new(KvReader::open("session", &session_path, true)?),
            tool: Arc::new(KvReader::open("tool", data_dir.join("tool.db"), false)?),
            item: Arc::new(ItemReader::new(&item_path)?),
            agent: Arc::new(AgentReader::new(agent_id, agent_version)),
            pklres: Arc::new(PklresReader::new(data_dir.join("pklres.db"))?),
            session_files: vec![session_path, item_path],
        })
    }

    /// Dispatches a raw URI to the reader owning its scheme.
    pub async fn read(&self, raw: &str) -> Result<Vec<u8>, ReaderError> {
        let uri = ReadUri::parse(raw)?;
        match uri.scheme.as_str() {
            "memory" => self.memory.read(&uri).await,
            "session" => self.session.read(&uri).await,
            "tool" => self.tool.read(&uri).await,
            "item" => self.item.read(&uri).await,
            "agent" => self.agent.read(&uri).await,
            "pklres" => self.pklres.read(&uri).await,
            other => Err(ReaderError::UnknownScheme(other.to_string())),
        }
    }

    /// Releases the session-scoped stores: the per-request session and
    /// item files are removed. Safe to call more than once; runs on every
    /// exit path including panic unwinding.
    pub fn close(&self) {
        for path in &self.session_files {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove session store");
                }
            }
        }
    }
}
