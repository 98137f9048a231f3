//! SQLite connection factory and health check.

use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

/// Opens SQLite connections with WAL mode, foreign keys and a busy timeout,
/// and checks them before they are reused.
///
/// Note that every connection to `:memory:` opens its own private database.
#[derive(Debug)]
pub struct SqliteManager {
    inner: SqliteConnectionManager,
}

impl SqliteManager {
    /// Creates a manager for the database file at `db_path`.
    pub fn file(db_path: &str, busy_timeout_ms: u64) -> Self {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let inner = SqliteConnectionManager::file(db_path)
            .with_flags(flags)
            .with_init(move |conn| {
                // In-memory databases report "memory", which is acceptable.
                let journal_mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
                if journal_mode != "wal" && journal_mode != "memory" {
                    return Err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                        Some(format!(
                            "failed to set WAL journal mode, got: {}",
                            journal_mode
                        )),
                    ));
                }
                conn.execute_batch(&format!(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = {};",
                    busy_timeout_ms
                ))
            });

        Self { inner }
    }
}

impl ManageConnection for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        self.inner.connect()
    }

    /// Rolls back any transaction the previous holder left open, then runs a
    /// trivial round-trip statement.
    fn is_valid(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        if !conn.is_autocommit() {
            tracing::debug!("rolling back transaction left open by previous lease");
            conn.execute_batch("ROLLBACK")?;
        }

        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        if one != 1 {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("health check returned {one}")),
            ));
        }
        Ok(())
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        self.inner.has_broken(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_applies_pragmas() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("pragmas.db");
        let manager = SqliteManager::file(path.to_str().expect("utf-8 path"), 2_500);

        let conn = manager.connect().expect("should open connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500);
    }

    #[test]
    fn health_check_rolls_back_dangling_transaction() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("health.db");
        let manager = SqliteManager::file(path.to_str().expect("utf-8 path"), 1_000);
        let mut conn = manager.connect().expect("should open connection");

        conn.execute_batch(
            "CREATE TABLE marker (id INTEGER PRIMARY KEY);
             BEGIN;
             INSERT INTO marker (id) VALUES (1);",
        )
        .expect("should start a transaction");
        assert!(!conn.is_autocommit());

        manager.is_valid(&mut conn).expect("health check should succeed");
        assert!(conn.is_autocommit(), "transaction should be rolled back");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM marker", [], |row| row.get(0))
            .expect("should count rows");
        assert_eq!(count, 0, "uncommitted insert must not survive the health check");
    }

    #[test]
    fn health_check_succeeds_on_idle_connection() {
        let manager = SqliteManager::file(":memory:", 1_000);
        let mut conn = manager.connect().expect("should open connection");
        assert!(manager.is_valid(&mut conn).is_ok());
        assert!(!manager.has_broken(&mut conn));
    }
}
