//! Iteration state store.
//!
//! Holds the ordered value list a fan-out resource iterates over, plus a
//! single-row pointer at the value currently being processed. The file is
//! per-request; the iteration controller re-initialises it for each
//! iterated resource and clears it afterwards.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::params;

use super::{ReadUri, Reader, ReaderError};

/// SQLite-backed item store: `items(id, value)` + one-row `current`.
pub struct ItemReader {
    db_path: PathBuf,
}

impl ItemReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path)
            .map_err(|e| ReaderError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS current (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| ReaderError::Storage(e.to_string()))?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Replaces the table contents with the given values, in order. The
    /// current pointer is reset.
    pub async fn init(&self, values: &[String]) -> Result<(), ReaderError> {
        let db_path = self.db_path.clone();
        let values = values.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let tx = conn
                .transaction()
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            tx.execute("DELETE FROM items", [])
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            tx.execute("DELETE FROM current", [])
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            for value in &values {
                tx.execute("INSERT INTO items (value) VALUES (?1)", params![value])
                    .map_err(|e| ReaderError::Storage(e.to_string()))?;
            }
            tx.commit().map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(())
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    /// Moves the current pointer to the given value.
    pub async fn set_current(&self, value: &str) -> Result<(), ReaderError> {
        let db_path = self.db_path.clone();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            conn.execute(
                "INSERT OR REPLACE INTO current (id, value) VALUES (0, ?1)",
                params![value],
            )
            .map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(())
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    /// The value currently being processed, when the pointer is set.
    pub async fn current(&self) -> Result<Option<String>, ReaderError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT value FROM current WHERE id = 0")
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let value = stmt.query_row([], |row| row.get::<_, String>(0)).ok();
            Ok::<_, ReaderError>(value)
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    /// All values in insertion order.
    pub async fn list(&self) -> Result<Vec<String>, ReaderError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let mut stmt = conn
                .prepare("SELECT value FROM items ORDER BY id")
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            let values: Vec<String> = rows
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(values)
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }

    /// Empties the item table and the current pointer.
    pub async fn clear(&self) -> Result<(), ReaderError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path)
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            conn.execute("DELETE FROM items", [])
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            conn.execute("DELETE FROM current", [])
                .map_err(|e| ReaderError::Storage(e.to_string()))?;
            Ok::<_, ReaderError>(())
        })
        .await
        .map_err(|e| ReaderError::Storage(e.to_string()))?
    }
}

#[async_trait]
impl Reader for ItemReader {
    fn scheme(&self) -> &'static str {
        "item"
    }

    async fn read(&self, uri: &ReadUri) -> Result<Vec<u8>, ReaderError> {
        match uri.op.as_str() {
            "set" => {
                let value = uri.require("value")?;
                self.set_current(value).await?;
                Ok(Vec::new())
            }
            "list" => {
                let values = self.list().await?;
                let json = serde_json::to_vec(&values)
                    .map_err(|e| ReaderError::Storage(e.to_string()))?;
                Ok(json)
            }
            "current" => Ok(self.current().await?.unwrap_or_default().into_bytes()),
            "clear" => {
                self.clear().await?;
                Ok(Vec::new())
            }
            _ => Err(ReaderError::UnsupportedOp {
                scheme: "item".to_string(),
                op: uri.op.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_items() -> (ItemReader, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let reader = ItemReader::new(dir.path().join("items.db")).unwrap();
        (reader, dir)
    }

    fn vals(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn init_replaces_contents_in_order() {
        let (items, _dir) = temp_items();
        items.init(&vals(&["a", "b"])).await.unwrap();
        items.init(&vals(&["x", "y", "z"])).await.unwrap();
        assert_eq!(items.list().await.unwrap(), vals(&["x", "y", "z"]));
        assert_eq!(items.current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_moves_the_pointer() {
        let (items, _dir) = temp_items();
        items.init(&vals(&["x", "y"])).await.unwrap();
        items.set_current("x").await.unwrap();
        assert_eq!(items.current().await.unwrap().as_deref(), Some("x"));
        items.set_current("y").await.unwrap();
        assert_eq!(items.current().await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn clear_empties_items_and_pointer() {
        let (items, _dir) = temp_items();
        items.init(&vals(&["x"])).await.unwrap();
        items.set_current("x").await.unwrap();
        items.clear().await.unwrap();
        assert!(items.list().await.unwrap().is_empty());
        assert_eq!(items.current().await.unwrap(), None);
    }

    #[tokio::test]
    async fn uri_list_returns_a_json_array() {
        let (items, _dir) = temp_items();
        items.init(&vals(&["x", "y"])).await.unwrap();
        let uri = ReadUri::parse("item://?op=list").unwrap();
        let bytes = items.read(&uri).await.unwrap();
        let parsed: Vec<String> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, vals(&["x", "y"]));
    }

    #[tokio::test]
    async fn uri_set_requires_a_value() {
        let (items, _dir) = temp_items();
        let uri = ReadUri::parse("item://?op=set").unwrap();
        assert!(matches!(
            items.read(&uri).await,
            Err(ReaderError::InvalidUri(_))
        ));
    }
}
