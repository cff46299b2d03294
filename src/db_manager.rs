//! SQLite-backed durable store for cache envelopes.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

/// Raw cache row as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub version: i64,
    pub saved_unix_ms: i64,
    pub body: String,
}

/// One connection opened at construction and reused for every call.
pub struct DbManager {
    conn: Mutex<Connection>,
}

impl DbManager {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(2))?;
        let db_manager = Self {
            conn: Mutex::new(conn),
        };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.lock().execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                saved_unix_ms INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Cheap round trip used to decide whether this backend is usable.
    pub fn probe(&self) -> Result<(), rusqlite::Error> {
        self.lock().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn put_entry(
        &self,
        key: &str,
        version: i64,
        saved_unix_ms: i64,
        body: &str,
    ) -> Result<(), rusqlite::Error> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO cache_entries (key, version, saved_unix_ms, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET version = excluded.version,
                 saved_unix_ms = excluded.saved_unix_ms, body = excluded.body",
            params![key, version, saved_unix_ms, body],
        )?;
        tx.commit()
    }

    pub fn get_entry(&self, key: &str) -> Result<Option<StoredEntry>, rusqlite::Error> {
        self.lock()
            .query_row(
                "SELECT version, saved_unix_ms, body FROM cache_entries WHERE key = ?1",
                params![key],
                |row| {
                    Ok(StoredEntry {
                        version: row.get(0)?,
                        saved_unix_ms: row.get(1)?,
                        body: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn delete_entry(&self, key: &str) -> Result<bool, rusqlite::Error> {
        let removed = self
            .lock()
            .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), rusqlite::Error> {
        self.lock().execute_batch(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::DbManager;

    #[test]
    fn test_put_then_get_returns_latest_body() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        db.put_entry("index", 7, 10, "{\"a\":1}").expect("put");
        db.put_entry("index", 7, 20, "{\"a\":2}").expect("overwrite");
        let entry = db.get_entry("index").expect("get").expect("present");
        assert_eq!(entry.version, 7);
        assert_eq!(entry.saved_unix_ms, 20);
        assert_eq!(entry.body, "{\"a\":2}");
    }

    #[test]
    fn test_delete_entry_reports_whether_a_row_was_removed() {
        let db = DbManager::open_in_memory().expect("in-memory db");
        db.put_entry("k", 1, 0, "{}").expect("put");
        assert!(db.delete_entry("k").expect("delete"));
        assert!(!db.delete_entry("k").expect("delete again"));
        assert!(db.get_entry("k").expect("get").is_none());
    }

    #[test]
    fn test_open_on_disk_creates_database_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("cache.db");
        let db = DbManager::open(&db_path).expect("open");
        db.probe().expect("probe");
        assert!(db_path.exists());
    }

    #[test]
    fn test_reopening_database_keeps_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("cache.db");
        DbManager::open(&db_path)
            .expect("open")
            .put_entry("index", 7, 42, "{}")
            .expect("put");
        let reopened = DbManager::open(&db_path).expect("reopen");
        let entry = reopened.get_entry("index").expect("get").expect("present");
        assert_eq!(entry.saved_unix_ms, 42);
    }
}
