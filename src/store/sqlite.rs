//! SQLite-backed key-value store.
//!
//! All namespaces share one table; every operation opens its own connection
//! on the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::task;

use super::KeyValueStore;
use crate::error::StoreError;

#[derive(Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
    namespace: String,
}

impl SqliteStore {
    pub async fn new(db_path: impl AsRef<Path>, namespace: impl Into<String>) -> Result<Self, StoreError> {
        let path = db_path.as_ref().to_path_buf();
        let path_clone = path.clone();

        task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(StoreError::from_sqlite)?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    namespace TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (namespace, key)
                );
                "#,
                [],
            )
            .map_err(StoreError::from_sqlite)?;
            Ok::<_, StoreError>(())
        })
        .await??;

        Ok(Self {
            db_path: path,
            namespace: namespace.into(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.db_path.clone();
        let namespace = self.namespace.clone();
        let key = key.to_string();

        let raw: Option<String> = task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(StoreError::from_sqlite)?;
            conn.query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![&namespace, &key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from_sqlite)
        })
        .await??;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.db_path.clone();
        let namespace = self.namespace.clone();
        let key = key.to_string();
        let text = serde_json::to_string(&value)?;

        task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(StoreError::from_sqlite)?;
            conn.execute(
                "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
                params![&namespace, &key, &text],
            )
            .map_err(StoreError::from_sqlite)?;
            Ok::<_, StoreError>(())
        })
        .await?
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let path = self.db_path.clone();
        let namespace = self.namespace.clone();
        let key = key.to_string();

        task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(StoreError::from_sqlite)?;
            conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                params![&namespace, &key],
            )
            .map_err(StoreError::from_sqlite)?;
            Ok::<_, StoreError>(())
        })
        .await?
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let path = self.db_path.clone();
        let namespace = self.namespace.clone();

        task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(StoreError::from_sqlite)?;
            conn.execute("DELETE FROM kv WHERE namespace = ?1", params![&namespace])
                .map_err(StoreError::from_sqlite)?;
            Ok::<_, StoreError>(())
        })
        .await?
    }
}
