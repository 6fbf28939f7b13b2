//! Raw key-value layer.
//!
//! The store engine persists each collection as one opaque byte payload under
//! one stable string key.  [`KeyValue`] is the seam for that backend: async
//! `get`/`set`/`remove` plus key enumeration for the storage usage report.
//! No transactions, no range queries.
//!
//! [`SqliteKv`] is the production implementation, a single `kv` table in a
//! SQLite database.  [`MemoryKv`] backs unit tests and can inject a write
//! failure to exercise commit atomicity.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum KvError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            KvError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for KvError {}

impl From<rusqlite::Error> for KvError {
    fn from(e: rusqlite::Error) -> Self {
        KvError::Sqlite(e)
    }
}

impl From<std::io::Error> for KvError {
    fn from(e: std::io::Error) -> Self {
        KvError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Async string-keyed byte storage.
///
/// Keys are stable identifiers, one per collection kind.  Values are opaque
/// byte payloads; the layer never inspects them.
#[allow(async_fn_in_trait)]
pub trait KeyValue: Send + Sync + 'static {
    /// Read the payload under `key`.  `None` if the key has never been set.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Replace the payload under `key`.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError>;

    /// Remove `key`.  Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), KvError>;

    /// All keys currently present, sorted.
    async fn keys(&self) -> Result<Vec<String>, KvError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// Key-value storage over a single SQLite table.
///
/// `rusqlite` is synchronous, so every call hops through `spawn_blocking`
/// with the connection behind a mutex.
#[derive(Clone)]
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKv {
    /// Open or create a database at the given path. Creates the table and
    /// parent directory if needed.
    pub fn open(path: &Path) -> Result<Self, KvError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::create_schema(&conn)?;
        Ok(SqliteKv {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, KvError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(SqliteKv {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_schema(conn: &Connection) -> Result<(), KvError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key     TEXT PRIMARY KEY,
                value   BLOB NOT NULL
            );",
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, KvError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, KvError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            f(&conn)
        })
        .await
        .map_err(|e| KvError::Io(std::io::Error::other(e)))?
    }
}

impl KeyValue for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", [&key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(KvError::from)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        let key = key.to_string();
        let value = value.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", [&key])?;
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, KvError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Hash-map backed storage for tests.
///
/// `fail_next_set` arms a one-shot write failure so tests can observe that a
/// failed persist leaves cache and disk untouched.
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_next_set: Arc<AtomicBool>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `set` call fail with an I/O error.
    pub fn fail_next_set(&self) {
        self.fail_next_set.store(true, Ordering::SeqCst);
    }
}

impl KeyValue for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.inner.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), KvError> {
        if self.fail_next_set.swap(false, Ordering::SeqCst) {
            return Err(KvError::Io(std::io::Error::other("injected write failure")));
        }
        self.inner
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, KvError> {
        let mut keys: Vec<String> = self.inner.lock().unwrap().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_round_trip() {
        let kv = SqliteKv::open_in_memory().unwrap();
        assert!(kv.get("places").await.unwrap().is_none());

        kv.set("places", b"[1,2,3]").await.unwrap();
        assert_eq!(kv.get("places").await.unwrap().unwrap(), b"[1,2,3]");

        // Overwrite
        kv.set("places", b"[]").await.unwrap();
        assert_eq!(kv.get("places").await.unwrap().unwrap(), b"[]");

        kv.set("trailers", b"{}").await.unwrap();
        assert_eq!(kv.keys().await.unwrap(), vec!["places", "trailers"]);

        kv.remove("places").await.unwrap();
        assert!(kv.get("places").await.unwrap().is_none());
        // Removing again is fine.
        kv.remove("places").await.unwrap();
    }

    #[tokio::test]
    async fn sqlite_open_creates_parent_dirs() {
        let pid = std::process::id();
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("rigbook-kv-{pid}-{ts}"));
        let kv = SqliteKv::open(&dir.join("nested").join("records.db")).unwrap();
        kv.set("contacts", b"[]").await.unwrap();
        drop(kv);

        // Payload survives reopen.
        let kv = SqliteKv::open(&dir.join("nested").join("records.db")).unwrap();
        assert_eq!(kv.get("contacts").await.unwrap().unwrap(), b"[]");
    }

    #[tokio::test]
    async fn memory_injected_failure_is_one_shot() {
        let kv = MemoryKv::new();
        kv.set("k", b"v1").await.unwrap();

        kv.fail_next_set();
        assert!(kv.set("k", b"v2").await.is_err());
        // Old payload untouched, next write succeeds.
        assert_eq!(kv.get("k").await.unwrap().unwrap(), b"v1");
        kv.set("k", b"v3").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().unwrap(), b"v3");
    }
}
