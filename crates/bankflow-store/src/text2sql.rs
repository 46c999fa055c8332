//! Repository for the `text2sql_history` table.

use bankflow::Result;
use rusqlite::params;
use serde::Serialize;

use crate::db::{db_err, Database};
use crate::now_rfc3339;

/// One generated-query record.
#[derive(Debug, Clone, Serialize)]
pub struct Text2SqlEntry {
    pub id: i64,
    pub natural_language: String,
    pub generated_sql: Option<String>,
    pub executed: bool,
    pub row_count: i64,
    pub created_at: String,
}

#[derive(Clone)]
pub struct Text2SqlRepo {
    db: Database,
}

impl Text2SqlRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn save_query(&self, natural_language: &str, generated_sql: &str) -> Result<i64> {
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO text2sql_history (natural_language, generated_sql, created_at)
                 VALUES (?1, ?2, ?3)",
                params![natural_language, generated_sql, now_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Mark the most recent record for `sql` as executed.
    pub fn mark_executed(&self, sql: &str, row_count: i64) -> Result<()> {
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE text2sql_history SET executed = 1, row_count = ?1
                 WHERE id = (SELECT MAX(id) FROM text2sql_history WHERE generated_sql = ?2)",
                params![row_count, sql],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn list_history(&self, limit: usize) -> Result<Vec<Text2SqlEntry>> {
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(
                    "SELECT id, natural_language, generated_sql, executed, row_count, created_at
                     FROM text2sql_history ORDER BY created_at DESC, id DESC LIMIT ?1",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], |r| {
                    Ok(Text2SqlEntry {
                        id: r.get(0)?,
                        natural_language: r.get(1)?,
                        generated_sql: r.get(2)?,
                        executed: r.get::<_, i64>(3)? != 0,
                        row_count: r.get(4)?,
                        created_at: r.get(5)?,
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::init_admin_db;

    fn repo(dir: &tempfile::TempDir) -> Text2SqlRepo {
        let db = Database::new(dir.path().join("admin.db"));
        init_admin_db(&db).unwrap();
        Text2SqlRepo::new(db)
    }

    #[test]
    fn test_save_and_mark_executed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.save_query("count accounts", "SELECT COUNT(*) FROM accounts;").unwrap();
        repo.mark_executed("SELECT COUNT(*) FROM accounts;", 1).unwrap();

        let history = repo.list_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].executed);
        assert_eq!(history[0].row_count, 1);
    }

    #[test]
    fn test_mark_executed_targets_latest() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.save_query("q1", "SELECT 1;").unwrap();
        repo.save_query("q2", "SELECT 1;").unwrap();
        repo.mark_executed("SELECT 1;", 5).unwrap();

        let history = repo.list_history(10).unwrap();
        let executed: Vec<_> = history.iter().filter(|h| h.executed).collect();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].natural_language, "q2");
    }
}
