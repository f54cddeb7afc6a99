//! Embedded-DB KVS backend: a single `kvs_data` table in a `rusqlite`
//! connection with WAL journaling, soft-delete, and periodic hard-delete
//! compaction.

use crate::error::Error;
use crate::kvs::backend::{BackendKind, KvsBackend};
use crate::value::{TypeTag, TypedValue};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;

const HARD_DELETE_INTERVAL: u64 = 100;

struct State {
    conn: Connection,
    sync_count: u64,
}

/// Single-table embedded-DB backend: `kvs_data(key TEXT PRIMARY KEY, value
/// TEXT, deleted INTEGER)`. Every operation is serialised behind one
/// mutex.
pub struct SqliteKvsBackend {
    db_path: PathBuf,
    state: Mutex<State>,
}

impl SqliteKvsBackend {
    /// Opens (creating if absent) the database at
    /// `{instance_root}/current/kvs_data.sqlite3`.
    pub fn open(instance_root: impl Into<PathBuf>) -> Result<Self, Error> {
        let instance_root = instance_root.into();
        std::fs::create_dir_all(instance_root.join("current"))?;
        let db_path = instance_root.join("current").join("kvs_data.sqlite3");

        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", -10 * 1024)?;
        conn.pragma_update(None, "mmap_size", 64 * 1024 * 1024i64)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kvs_data (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            ) WITHOUT ROWID;
            CREATE INDEX IF NOT EXISTS idx_kvs_data_deleted ON kvs_data(deleted);",
        )?;

        info!("opened embedded-db kvs backend at {}", db_path.display());
        Ok(SqliteKvsBackend { db_path, state: Mutex::new(State { conn, sync_count: 0 }) })
    }

    fn encode(value: &TypedValue) -> String {
        format!("{}{}", value.tag().as_char(), value.raw_text())
    }

    fn decode(encoded: &str) -> Result<TypedValue, Error> {
        let mut chars = encoded.chars();
        let tag_char = chars.next().ok_or_else(|| Error::IntegrityCorrupted("empty encoded value".to_string()))?;
        let tag = TypeTag::from_char(tag_char)
            .ok_or_else(|| Error::IntegrityCorrupted(format!("unknown type tag '{}'", tag_char)))?;
        crate::value::parse_as(chars.as_str(), tag)
    }
}

impl std::fmt::Display for SqliteKvsBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteKvsBackend({})", self.db_path.display())
    }
}

impl KvsBackend for SqliteKvsBackend {
    fn available(&self) -> bool {
        self.db_path.exists()
    }

    fn get_all_keys(&self) -> Result<Vec<String>, Error> {
        let state = self.state.lock()?;
        let mut stmt = state.conn.prepare("SELECT key FROM kvs_data WHERE deleted = 0")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    fn key_exists(&self, key: &str) -> Result<bool, Error> {
        let state = self.state.lock()?;
        let exists: Option<i64> = state
            .conn
            .query_row("SELECT 1 FROM kvs_data WHERE key = ?1 AND deleted = 0 LIMIT 1", params![key], |row| row.get(0))
            .optional()?;
        Ok(exists.is_some())
    }

    fn get_value(&self, key: &str, tag: TypeTag) -> Result<TypedValue, Error> {
        let state = self.state.lock()?;
        let encoded: Option<String> = state
            .conn
            .query_row("SELECT value FROM kvs_data WHERE key = ?1 AND deleted = 0", params![key], |row| row.get(0))
            .optional()?;
        let encoded = encoded.ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        let value = Self::decode(&encoded)?;
        if value.tag() as u8 != tag as u8 {
            return Err(Error::DataTypeMismatch(format!("{} is not {:?}", key, tag)));
        }
        Ok(value)
    }

    fn get_any(&self, key: &str) -> Result<TypedValue, Error> {
        let state = self.state.lock()?;
        let encoded: Option<String> = state
            .conn
            .query_row("SELECT value FROM kvs_data WHERE key = ?1 AND deleted = 0", params![key], |row| row.get(0))
            .optional()?;
        let encoded = encoded.ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        Self::decode(&encoded)
    }

    fn set_value(&self, key: &str, value: &TypedValue) -> Result<(), Error> {
        let state = self.state.lock()?;
        let encoded = Self::encode(value);
        state.conn.execute(
            "INSERT INTO kvs_data (key, value, deleted) VALUES (?1, ?2, 0)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, deleted = 0",
            params![key, encoded],
        )?;
        Ok(())
    }

    /// Idempotent-success on a missing key, matching the original
    /// `CKvsSqliteBackend::RemoveKey` (checks only `rc != SQLITE_DONE`,
    /// never the affected-row count).
    fn remove_key(&self, key: &str) -> Result<(), Error> {
        let state = self.state.lock()?;
        state.conn.execute("UPDATE kvs_data SET deleted = 1 WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn remove_all_keys(&self) -> Result<(), Error> {
        let state = self.state.lock()?;
        state.conn.execute("UPDATE kvs_data SET deleted = 1", [])?;
        Ok(())
    }

    fn sync_to_storage(&self) -> Result<(), Error> {
        let mut state = self.state.lock()?;
        state.conn.execute_batch("PRAGMA wal_checkpoint(FULL);")?;
        state.sync_count += 1;
        if state.sync_count % HARD_DELETE_INTERVAL == 0 {
            let purged = state.conn.execute("DELETE FROM kvs_data WHERE deleted = 1", [])?;
            debug!("hard-deleted {} soft-deleted rows after {} syncs", purged, state.sync_count);
        }
        Ok(())
    }

    fn discard_pending_changes(&self) -> Result<(), Error> {
        // All mutations are already transactionally visible in SQLite;
        // nothing buffered in-process to discard.
        Ok(())
    }

    /// Idempotent-success on a missing key, matching the original
    /// `CKvsSqliteBackend::RecoveryKey`.
    fn recover_key(&self, key: &str) -> Result<(), Error> {
        let state = self.state.lock()?;
        state.conn.execute("UPDATE kvs_data SET deleted = 0 WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Idempotent-success on a missing key, matching the original
    /// `CKvsSqliteBackend::ResetKey`.
    fn reset_key(&self, key: &str) -> Result<(), Error> {
        let state = self.state.lock()?;
        state.conn.execute("DELETE FROM kvs_data WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn get_size(&self) -> Result<u64, Error> {
        if !self.db_path.exists() {
            return Ok(0);
        }
        Ok(std::fs::metadata(&self.db_path)?.len())
    }

    fn get_key_count(&self) -> Result<u64, Error> {
        let state = self.state.lock()?;
        let count: i64 =
            state.conn.query_row("SELECT COUNT(*) FROM kvs_data WHERE deleted = 0", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn backend_type(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn supports_persistence(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvs::backend::test_support::test_kvs_backend;

    fn setup() -> SqliteKvsBackend {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteKvsBackend::open(dir.path()).unwrap();
        std::mem::forget(dir);
        backend
    }

    test_kvs_backend!(setup());

    #[test]
    fn soft_deleted_key_hidden_until_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteKvsBackend::open(dir.path()).unwrap();
        backend.set_value("a", &TypedValue::Int32(1)).unwrap();
        backend.remove_key("a").unwrap();
        assert!(!backend.key_exists("a").unwrap());

        backend.recover_key("a").unwrap();
        assert!(backend.key_exists("a").unwrap());
        assert_eq!(backend.get_value("a", TypeTag::Int32).unwrap(), TypedValue::Int32(1));
    }

    #[test]
    fn reset_key_hard_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteKvsBackend::open(dir.path()).unwrap();
        backend.set_value("a", &TypedValue::Int32(1)).unwrap();
        backend.remove_key("a").unwrap();
        backend.reset_key("a").unwrap();

        // recover_key is idempotent-success even though the row is gone;
        // the hard delete is observable only through key_exists staying false.
        backend.recover_key("a").unwrap();
        assert!(!backend.key_exists("a").unwrap());
    }

    #[test]
    fn hard_delete_runs_every_hundred_syncs() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SqliteKvsBackend::open(dir.path()).unwrap();
        backend.set_value("a", &TypedValue::Int32(1)).unwrap();
        backend.remove_key("a").unwrap();

        for _ in 0..HARD_DELETE_INTERVAL {
            backend.sync_to_storage().unwrap();
        }

        backend.recover_key("a").unwrap();
        assert!(!backend.key_exists("a").unwrap());
    }
}
