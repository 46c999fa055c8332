//! Transactional connect primitive shared by all repositories.

use std::path::{Path, PathBuf};

use bankflow::{Error, Result};
use rusqlite::{Connection, Transaction};

/// Handle to one SQLite database file.
///
/// Cheap to clone; each [`Database::transaction`] call opens its own
/// connection, so handles can be shared freely across worker threads.
/// WAL keeps readers concurrent with the single writer.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Data(format!("Database error: {e}"))
}

impl Database {
    /// Handle for a database file; nothing is opened until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside one transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls the transaction back
    /// (drop semantics) and closes the connection.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(&self.path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;

        let tx = conn.transaction().map_err(db_err)?;
        let out = f(&tx)?;
        tx.commit().map_err(db_err)?;
        Ok(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_on_ok() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("t.db"));
        db.transaction(|tx| {
            tx.execute("CREATE TABLE kv (k TEXT, v TEXT)", [])
                .map_err(db_err)?;
            tx.execute("INSERT INTO kv VALUES ('a', '1')", [])
                .map_err(db_err)?;
            Ok(())
        })
        .unwrap();

        let count: i64 = db
            .transaction(|tx| {
                tx.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))
                    .map_err(db_err)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_rollback_on_err() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("t.db"));
        db.transaction(|tx| {
            tx.execute("CREATE TABLE kv (k TEXT)", []).map_err(db_err)?;
            Ok(())
        })
        .unwrap();

        let failed: Result<()> = db.transaction(|tx| {
            tx.execute("INSERT INTO kv VALUES ('doomed')", [])
                .map_err(db_err)?;
            Err(Error::validation("abort"))
        });
        assert!(failed.is_err());

        let count: i64 = db
            .transaction(|tx| {
                tx.query_row("SELECT COUNT(*) FROM kv", [], |r| r.get(0))
                    .map_err(db_err)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
