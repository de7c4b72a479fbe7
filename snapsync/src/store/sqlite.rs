//! SQLite-backed cache store.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use super::CacheStore;
use crate::cache_key::CacheKey;
use crate::error::{SyncError, SyncResult};

/// SQLite-backed cache store. Clones share one connection.
#[derive(Clone)]
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Create or open a store at the given file path.
    pub fn new(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SyncError::store(format!("Failed to open cache database: {e}")))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store for testing.
    pub fn in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::store(format!("Failed to create in-memory cache: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> SyncResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS calculator_state (
                    key TEXT PRIMARY KEY,
                    state_json BLOB NOT NULL,
                    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
                )",
                [],
            )
            .map(|_| ())
            .map_err(|e| SyncError::store(format!("Failed to create schema: {e}")))
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SyncResult<T>) -> SyncResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SyncError::store(format!("Failed to acquire lock: {e}")))?;
        f(&conn)
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &CacheKey) -> SyncResult<Option<Vec<u8>>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT state_json FROM calculator_state WHERE key = ?1",
                [key.as_str()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| SyncError::store(format!("Failed to load state: {e}")))
        })
    }

    async fn set(&self, key: &CacheKey, state: Vec<u8>) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO calculator_state (key, state_json, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET
                    state_json = excluded.state_json,
                    updated_at = excluded.updated_at",
                rusqlite::params![key.as_str(), state],
            )
            .map(|_| ())
            .map_err(|e| SyncError::store(format!("Failed to save state: {e}")))
        })
    }

    async fn remove(&self, key: &CacheKey) -> SyncResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM calculator_state WHERE key = ?1",
                [key.as_str()],
            )
            .map(|_| ())
            .map_err(|e| SyncError::store(format!("Failed to remove state: {e}")))
        })
    }

    async fn keys(&self) -> SyncResult<Vec<CacheKey>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key FROM calculator_state ORDER BY key")
                .map_err(|e| SyncError::store(format!("Failed to prepare query: {e}")))?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| SyncError::store(format!("Failed to query keys: {e}")))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| SyncError::store(format!("Failed to read key row: {e}")))?;
            Ok(keys.into_iter().map(CacheKey::from_raw).collect())
        })
    }
}
