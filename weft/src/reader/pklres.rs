//! Cross-step output cache.
//!
//! Two-level KV: `(collection, key) -> value`. Step executors publish
//! their output records here (keyed by canonical action id and step
//! name), the step driver watches the record's timestamp, and the loader
//! publishes the request's fields so reloaded resources can template
//! against them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::params;

use super::{ReadUri, Reader, ReaderError};

/// SQLite-backed collection/key store.
pub struct PklresReader {
    db_path: PathBuf,
}

impl PklresReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| ReaderError::Storage(e.to_string()))?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS pklres (
                collection TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            )
            "#,
            [],
        )
        .map_err(|e| ReaderError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, ReaderError> {
        let db_path = self.db_path.clone();
        let collection = collection.to_string();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT value FROM pklres WHERE collection = ?1 AND key = ?2")
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let value = stmt
                .query_row(params![collection, key], |row| row.get::<_, String>(0))
                .ok();
            Ok::<_, ReaderError>(value)
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    pub async fn set(&self, collection: &str, key: &str, value: &str) -> Result<(), ReaderError> {
        let db_path = self.db_path.clone();
        let collection = collection.to_string();
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO pklres (collection, key, value) VALUES (?1, ?2, ?3)",
                params![collection, key, value],
            )
            .map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(())
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }
}

#[async_trait]
impl Reader for PklresReader {
    fn scheme(&self) -> &'static str {
        "pklres"
    }

    async fn read(&self, uri: &ReadUri) -> Result<Vec<u8>, ReaderError> {
        let collection = uri.require("collection")?;
        let key = uri.require("key")?;
        match uri.op.as_str() {
            "get" => Ok(self
                .get(collection, key)
                .await?
                .unwrap_or_default()
                .into_bytes()),
            "set" => {
                let value = uri.require("value")?;
                self.set(collection, key, value).await?;
                Ok(Vec::new())
            }
            _ => Err(ReaderError::UnsupportedOp {
                scheme: "pklres".to_string(),
                op: uri.op.clone(),
            }),
        }
    }
}
