//! Per-actor SQLite storage.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use super::ActorError;

/// The alarm slot every actor database carries.
const ALARM_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS _alarm (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    at INTEGER NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0
)";

/// A SQLite connection owned by one actor instance.
///
/// Calls are synchronous and short; the lock is never held across an `.await`.
#[derive(Debug)]
pub struct SqlStorage {
    conn: Mutex<Connection>,
}

impl SqlStorage {
    pub fn open(path: &Path) -> Result<Self, ActorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ActorError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, ActorError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ActorError> {
        conn.execute_batch(ALARM_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, ActorError> {
        let mut conn = self.conn.lock().map_err(|_| ActorError::Poisoned)?;
        Ok(f(&mut conn)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), ActorError> {
        self.with_conn(|conn| conn.execute_batch(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ns").join("a.sqlite");
        {
            let storage = SqlStorage::open(&path).unwrap();
            storage
                .execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7);")
                .unwrap();
        }
        let storage = SqlStorage::open(&path).unwrap();
        let v: i64 = storage
            .with_conn(|c| c.query_row("SELECT v FROM t", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(v, 7);
    }
}
