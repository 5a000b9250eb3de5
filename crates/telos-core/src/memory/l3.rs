//! L3 - durable object store
//!
//! SQLite-backed transactional key/value store with an append-only
//! transaction log. Commits are atomic per call; the fabric never batches
//! across `store` calls. The store is shared between the cache fabric and
//! the concept repository (the repository is the sole writer for concept
//! records).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Object store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Key not found
    #[error("Object not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Value (de)serialization error
    #[error("Object codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Lock poisoned by a panicking holder
    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Object store result type
pub type Result<T> = std::result::Result<T, ObjectStoreError>;

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS objects (
    key        TEXT PRIMARY KEY,
    object     TEXT NOT NULL,
    stored_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tx_log (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    operation  TEXT NOT NULL,
    key        TEXT NOT NULL,
    at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tx_log_key ON tx_log(key);
";

// ============================================================================
// OBJECT STORE
// ============================================================================

/// A row read back from L3
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Object key (cache key or concept oid)
    pub key: String,
    /// The stored JSON object
    pub object: serde_json::Value,
    /// Commit timestamp
    pub stored_at: DateTime<Utc>,
}

/// SQLite-backed durable store.
///
/// Separate reader/writer connections behind mutexes for interior
/// mutability; all methods take `&self` so callers can share an `Arc`.
pub struct L3ObjectStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
}

impl L3ObjectStore {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at `dir/objects.db`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join("objects.db");

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        writer.execute_batch(SCHEMA)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path,
        })
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically commit `object` under `key` with the given timestamp.
    ///
    /// Per-key `stored_at` stays monotonic: an older write is a no-op.
    pub fn store(
        &self,
        key: &str,
        object: &serde_json::Value,
        stored_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ObjectStoreError::LockPoisoned)?;

        let tx = writer.transaction()?;
        let resident: Option<String> = tx
            .query_row(
                "SELECT stored_at FROM objects WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(raw) = resident {
            if let Ok(existing) = raw.parse::<DateTime<Utc>>() {
                if existing > stored_at {
                    tx.commit()?;
                    return Ok(());
                }
            }
        }

        tx.execute(
            "INSERT INTO objects (key, object, stored_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET object = ?2, stored_at = ?3",
            params![key, serde_json::to_string(object)?, stored_at.to_rfc3339()],
        )?;
        tx.execute(
            "INSERT INTO tx_log (operation, key, at) VALUES ('store', ?1, ?2)",
            params![key, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Read the object under `key`; `None` on miss
    pub fn retrieve(&self, key: &str) -> Result<Option<StoredObject>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| ObjectStoreError::LockPoisoned)?;

        let row: Option<(String, String)> = reader
            .query_row(
                "SELECT object, stored_at FROM objects WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((raw_object, raw_stored_at)) => {
                let object = serde_json::from_str(&raw_object)?;
                let stored_at = raw_stored_at.parse::<DateTime<Utc>>().map_err(|_| {
                    ObjectStoreError::NotFound(format!("unparseable stored_at for {key}"))
                })?;
                Ok(Some(StoredObject {
                    key: key.to_string(),
                    object,
                    stored_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Delete the object under `key`; error on miss
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ObjectStoreError::LockPoisoned)?;

        let tx = writer.transaction()?;
        let affected = tx.execute("DELETE FROM objects WHERE key = ?1", params![key])?;
        if affected == 0 {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        tx.execute(
            "INSERT INTO tx_log (operation, key, at) VALUES ('delete', ?1, ?2)",
            params![key, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete if present; `Ok(false)` on miss (outbox invalidation path)
    pub fn delete_if_present(&self, key: &str) -> Result<bool> {
        match self.delete(key) {
            Ok(()) => Ok(true),
            Err(ObjectStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List keys, paginated, ordered for stable iteration
    pub fn list_keys(&self, limit: usize, offset: usize) -> Result<Vec<String>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| ObjectStoreError::LockPoisoned)?;

        let mut stmt =
            reader.prepare("SELECT key FROM objects ORDER BY key LIMIT ?1 OFFSET ?2")?;
        let keys = stmt
            .query_map(params![limit as i64, offset as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// List keys matching a prefix (concept records share an oid prefix)
    pub fn list_keys_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| ObjectStoreError::LockPoisoned)?;

        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = reader.prepare(
            "SELECT key FROM objects WHERE key LIKE ?1 ESCAPE '\\'
             ORDER BY key LIMIT ?2 OFFSET ?3",
        )?;
        let keys = stmt
            .query_map(params![pattern, limit as i64, offset as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Number of stored objects
    pub fn len(&self) -> Result<usize> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| ObjectStoreError::LockPoisoned)?;
        let count: i64 = reader.query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether the store holds no objects
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Commit timestamp for `key`, if present
    pub fn stored_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.retrieve(key)?.map(|o| o.stored_at))
    }

    /// Length of the append-only transaction log
    pub fn tx_log_len(&self) -> Result<usize> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| ObjectStoreError::LockPoisoned)?;
        let count: i64 = reader.query_row("SELECT COUNT(*) FROM tx_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, L3ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = L3ObjectStore::open(dir.path().join("l3")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_retrieve_roundtrip() {
        let (_dir, store) = open_store();
        let value = serde_json::json!({ "label": "gravity", "confidence": 0.9 });

        store.store("k1", &value, Utc::now()).unwrap();
        let got = store.retrieve("k1").unwrap().unwrap();
        assert_eq!(got.object, value);
    }

    #[test]
    fn test_retrieve_miss_is_none() {
        let (_dir, store) = open_store();
        assert!(store.retrieve("absent").unwrap().is_none());
    }

    #[test]
    fn test_delete_miss_is_error() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.delete("absent"),
            Err(ObjectStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_monotonic_stored_at() {
        let (_dir, store) = open_store();
        let newer = Utc::now();
        let older = newer - chrono::Duration::seconds(60);

        store
            .store("k", &serde_json::json!({"v": "new"}), newer)
            .unwrap();
        store
            .store("k", &serde_json::json!({"v": "old"}), older)
            .unwrap();

        let got = store.retrieve("k").unwrap().unwrap();
        assert_eq!(got.object, serde_json::json!({"v": "new"}));
    }

    #[test]
    fn test_tx_log_appends() {
        let (_dir, store) = open_store();
        store
            .store("k", &serde_json::json!({"v": 1}), Utc::now())
            .unwrap();
        store
            .store("k", &serde_json::json!({"v": 2}), Utc::now())
            .unwrap();
        store.delete("k").unwrap();

        assert_eq!(store.tx_log_len().unwrap(), 3);
    }

    #[test]
    fn test_list_keys_pagination() {
        let (_dir, store) = open_store();
        for key in ["a", "b", "c", "d"] {
            store
                .store(key, &serde_json::json!({}), Utc::now())
                .unwrap();
        }

        let page = store.list_keys(2, 1).unwrap();
        assert_eq!(page, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_durability_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = L3ObjectStore::open(dir.path().join("l3")).unwrap();
            store
                .store("persisted", &serde_json::json!({"v": 42}), Utc::now())
                .unwrap();
        }

        let reopened = L3ObjectStore::open(dir.path().join("l3")).unwrap();
        let got = reopened.retrieve("persisted").unwrap().unwrap();
        assert_eq!(got.object, serde_json::json!({"v": 42}));
    }
}
