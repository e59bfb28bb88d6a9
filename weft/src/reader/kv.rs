//! Shared SQLite key/value substrate for the flat readers.
//!
//! `memory`, `session` and `tool` are all one-table KV stores that differ
//! only in file location and lifetime. Opens a connection per operation
//! via `spawn_blocking`; rusqlite handles its own locking on the file.

use std::path::{Path, PathBuf};

use rusqlite::params;

use super::ReaderError;

/// One SQLite KV table. The table is bootstrapped in `new` so every later
/// operation can assume it exists.
#[derive(Clone, Debug)]
pub(crate) struct SqliteKv {
    db_path: PathBuf,
}

impl SqliteKv {
    pub(crate) fn new(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| ReaderError::Storage(e.to_string()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .map_err(|e| ReaderError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>, ReaderError> {
        let db_path = self.db_path.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT value FROM kv WHERE key = ?1")
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let value = stmt
                .query_row(params![key], |row| row.get::<_, String>(0))
                .ok();
            Ok::<_, ReaderError>(value)
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    pub(crate) async fn set(&self, key: &str, value: &str) -> Result<(), ReaderError> {
        let db_path = self.db_path.clone();
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(())
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), ReaderError> {
        let db_path = self.db_path.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(())
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    pub(crate) async fn clear(&self) -> Result<(), ReaderError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            conn.execute("DELETE FROM kv", [])
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(())
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }
}
