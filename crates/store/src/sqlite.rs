//! SQLite-backed store: a single `kv` table in an embedded database file.
//!
//! Rows are scoped by a `namespace` column, so several workflows can share
//! one database file without seeing each other's keys.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::traits::validate_key;
use crate::{KeyValueStore, StoreError};

pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    namespace: String,
}

impl SqliteStore {
    /// Open or create a database at `path`, using the default namespace.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_namespaced(path, "")
    }

    /// Open or create a database at `path`; every key lives in `namespace`.
    pub fn open_namespaced(path: &Path, namespace: &str) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        debug!(path = %path.display(), namespace, "sqlite store opened");
        Self::with_connection(conn, namespace)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, "")
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn with_connection(conn: Connection, namespace: &str) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            namespace: namespace.to_owned(),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        validate_key(key)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
                params![self.namespace, key, value],
            )?;
            Ok(())
        })
    }

    async fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(key.to_owned()))
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
            )?;
            Ok(())
        })
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv WHERE namespace = ?1 ORDER BY key")?;
            let keys = stmt
                .query_map(params![self.namespace], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}
