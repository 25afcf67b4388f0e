use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Default namespace for every persisted key.
pub const DEFAULT_PREFIX: &str = "hr-assistant-";

const DB_FILE: &str = "hr-assistant.db";
const PROBE_KEY: &str = "__test__";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage is unavailable")]
    Unavailable,
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: u64, quota: u64 },
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Prefixed key/value persistence.
///
/// Persistence is a convenience: every failure is logged and swallowed, so
/// callers only ever see a no-op or a `None`. When the database cannot be
/// opened the adapter runs unavailable and the session stays in memory only.
pub struct LocalStorage {
    conn: Option<Mutex<Connection>>,
    prefix: String,
    quota_bytes: Option<u64>,
}

impl LocalStorage {
    /// Open (or create) the store under `data_dir`.
    pub fn open(data_dir: &Path, prefix: &str) -> Self {
        match Self::open_connection(data_dir) {
            Ok(conn) => Self::with_connection(conn, prefix),
            Err(e) => {
                warn!(error = %e, dir = %data_dir.display(), "local storage unavailable, history will not persist");
                Self::unavailable(prefix)
            }
        }
    }

    pub fn in_memory(prefix: &str) -> Self {
        match Connection::open_in_memory() {
            Ok(conn) => Self::with_connection(conn, prefix),
            Err(e) => {
                warn!(error = %e, "in-memory storage unavailable");
                Self::unavailable(prefix)
            }
        }
    }

    pub fn unavailable(prefix: &str) -> Self {
        Self {
            conn: None,
            prefix: prefix.to_string(),
            quota_bytes: None,
        }
    }

    /// Cap the total size of prefixed values, like a browser storage quota.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    fn open_connection(data_dir: &Path) -> Result<Connection, StorageError> {
        std::fs::create_dir_all(data_dir).map_err(|_| StorageError::Unavailable)?;
        let conn = Connection::open(data_dir.join(DB_FILE))?;
        Ok(conn)
    }

    fn with_connection(conn: Connection, prefix: &str) -> Self {
        let storage = Self {
            conn: Some(Mutex::new(conn)),
            prefix: prefix.to_string(),
            quota_bytes: None,
        };
        if let Err(e) = storage.migrate() {
            warn!(error = %e, "failed to prepare local storage, history will not persist");
            return Self::unavailable(prefix);
        }
        storage
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS local_storage (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        let conn = self.conn.as_ref().ok_or(StorageError::Unavailable)?;
        conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    // ── Public contract: never fails ──

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_set(key, value) {
            warn!(key, error = %e, "error saving to local storage");
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "error reading from local storage");
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.try_remove(key) {
            warn!(key, error = %e, "error removing from local storage");
        }
    }

    /// Remove every key carrying this adapter's prefix.
    pub fn clear(&self) {
        if let Err(e) = self.try_clear() {
            warn!(error = %e, "error clearing local storage");
        }
    }

    pub fn is_available(&self) -> bool {
        let probe = self
            .try_set(PROBE_KEY, "test")
            .and_then(|_| self.try_remove(PROBE_KEY));
        probe.is_ok()
    }

    // ── Fallible internals ──

    fn try_set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(value)?;
        let full_key = self.prefixed(key);
        let conn = self.lock()?;

        if let Some(quota) = self.quota_bytes {
            let others: i64 = conn.query_row(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) FROM local_storage
                 WHERE substr(key, 1, ?1) = ?2 AND key != ?3",
                params![self.prefix.chars().count() as i64, self.prefix, full_key],
                |row| row.get(0),
            )?;
            let needed = others.max(0) as u64 + (full_key.len() + serialized.len()) as u64;
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        conn.execute(
            "INSERT OR REPLACE INTO local_storage (key, value) VALUES (?1, ?2)",
            params![full_key, serialized],
        )?;
        debug!(key, bytes = serialized.len(), "persisted");
        Ok(())
    }

    fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let conn = self.lock()?;
        let serialized: Option<String> = conn
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![self.prefixed(key)],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        match serialized {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    fn try_remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM local_storage WHERE key = ?1",
            params![self.prefixed(key)],
        )?;
        Ok(())
    }

    fn try_clear(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM local_storage WHERE substr(key, 1, ?1) = ?2",
            params![self.prefix.chars().count() as i64, self.prefix],
        )?;
        Ok(())
    }

    /// Store a raw, possibly invalid, value. Test hook for corrupt data.
    #[cfg(test)]
    pub(crate) fn set_raw(&self, key: &str, raw: &str) {
        if let Ok(conn) = self.lock() {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO local_storage (key, value) VALUES (?1, ?2)",
                params![self.prefixed(key), raw],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_set_get_roundtrip_with_prefix() {
        let storage = LocalStorage::in_memory(DEFAULT_PREFIX);
        let mut value = HashMap::new();
        value.insert("a".to_string(), 1);
        storage.set("map", &value);
        let back: Option<HashMap<String, i32>> = storage.get("map");
        assert_eq!(back, Some(value));

        let other = LocalStorage {
            conn: storage.conn,
            prefix: "other-".into(),
            quota_bytes: None,
        };
        assert_eq!(other.get::<HashMap<String, i32>>("map"), None);
    }

    #[test]
    fn test_missing_key_is_none() {
        let storage = LocalStorage::in_memory(DEFAULT_PREFIX);
        assert_eq!(storage.get::<String>("nothing"), None);
    }

    #[test]
    fn test_corrupt_value_reads_as_none() {
        let storage = LocalStorage::in_memory(DEFAULT_PREFIX);
        storage.set_raw("broken", "{not json");
        assert_eq!(storage.get::<Vec<String>>("broken"), None);
    }

    #[test]
    fn test_remove_and_clear_only_touch_prefix() {
        let storage = LocalStorage::in_memory("app-");
        storage.set("one", &1);
        storage.set("two", &2);
        {
            let conn = storage.lock().unwrap();
            conn.execute(
                "INSERT INTO local_storage (key, value) VALUES ('foreign', '3')",
                [],
            )
            .unwrap();
        }

        storage.remove("one");
        assert_eq!(storage.get::<i32>("one"), None);
        assert_eq!(storage.get::<i32>("two"), Some(2));

        storage.clear();
        assert_eq!(storage.get::<i32>("two"), None);
        let conn = storage.lock().unwrap();
        let foreign: i64 = conn
            .query_row("SELECT COUNT(*) FROM local_storage WHERE key = 'foreign'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(foreign, 1);
    }

    #[test]
    fn test_unavailable_storage_is_silent() {
        let storage = LocalStorage::unavailable(DEFAULT_PREFIX);
        storage.set("k", &"v");
        storage.remove("k");
        storage.clear();
        assert_eq!(storage.get::<String>("k"), None);
        assert!(!storage.is_available());
    }

    #[test]
    fn test_available_storage_probe_leaves_nothing_behind() {
        let storage = LocalStorage::in_memory(DEFAULT_PREFIX);
        assert!(storage.is_available());
        assert_eq!(storage.get::<String>(PROBE_KEY), None);
    }

    #[test]
    fn test_quota_exceeded_drops_write() {
        let storage = LocalStorage::in_memory(DEFAULT_PREFIX).with_quota(64);
        storage.set("small", &"ok");
        storage.set("big", &"x".repeat(100));
        assert_eq!(storage.get::<String>("small").as_deref(), Some("ok"));
        assert_eq!(storage.get::<String>("big"), None);
    }

    #[test]
    fn test_quota_counts_bytes_of_multibyte_values() {
        // Key plus JSON value: a = 3 + 14, b = 3 + 10, c = 3 + 8 bytes.
        let storage = LocalStorage::in_memory("t-").with_quota(38);
        storage.set("a", &"é".repeat(6));
        storage.set("b", &"x".repeat(8));
        assert_eq!(storage.get::<String>("b").as_deref(), Some("xxxxxxxx"));
        storage.set("c", &"é".repeat(3));
        assert_eq!(storage.get::<String>("a"), Some("é".repeat(6)));
        assert_eq!(storage.get::<String>("c"), None);
    }

    #[test]
    fn test_open_persists_across_instances() {
        let dir = std::env::temp_dir().join(format!("hr-assistant-storage-{}", uuid::Uuid::new_v4()));
        {
            let storage = LocalStorage::open(&dir, DEFAULT_PREFIX);
            storage.set("kept", &vec![1, 2, 3]);
        }
        let storage = LocalStorage::open(&dir, DEFAULT_PREFIX);
        assert_eq!(storage.get::<Vec<i32>>("kept"), Some(vec![1, 2, 3]));
        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
