//! Repository for the `datasets` table.
//!
//! A dataset row owns its file: deletion removes both, in that order, so a
//! crash between the two leaves the row (and a retryable delete) rather
//! than an orphaned row pointing at nothing.

use bankflow::{Error, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{db_err, Database};
use crate::models::{ColumnInfo, Dataset, DatasetSummary};

#[derive(Clone)]
pub struct DatasetRepo {
    db: Database,
}

impl DatasetRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list_all(&self) -> Result<Vec<DatasetSummary>> {
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(
                    "SELECT id, name, original_filename, file_size, rows, cols, created_at
                     FROM datasets ORDER BY created_at DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(DatasetSummary {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        filename: r.get(2)?,
                        size: r.get(3)?,
                        rows: r.get(4)?,
                        cols: r.get(5)?,
                        created_at: r.get(6)?,
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    pub fn find_by_id(&self, dataset_id: i64) -> Result<Dataset> {
        let row = self.db.transaction(|tx| {
            tx.query_row(
                "SELECT id, name, original_filename, file_path, file_size, rows, cols,
                        columns_json, created_at
                 FROM datasets WHERE id = ?1",
                params![dataset_id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, i64>(4)?,
                        r.get::<_, i64>(5)?,
                        r.get::<_, i64>(6)?,
                        r.get::<_, String>(7)?,
                        r.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)
        })?;

        let Some((id, name, filename, file_path, size, rows, cols, columns_json, created_at)) = row
        else {
            return Err(Error::not_found(format!("Dataset {dataset_id} not found")));
        };

        let columns: Vec<ColumnInfo> = serde_json::from_str(&columns_json).unwrap_or_default();
        Ok(Dataset {
            id,
            name,
            filename,
            file_path,
            size,
            rows,
            cols,
            columns,
            created_at,
        })
    }

    pub fn find_by_file_path(&self, file_path: &str) -> Result<Option<i64>> {
        self.db.transaction(|tx| {
            tx.query_row(
                "SELECT id FROM datasets WHERE file_path = ?1",
                params![file_path],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Insert a new dataset row; returns the new id.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        name: &str,
        original_filename: &str,
        file_path: &str,
        file_size: i64,
        rows: i64,
        cols: i64,
        columns: &[ColumnInfo],
    ) -> Result<i64> {
        let columns_json = serde_json::to_string(columns)?;
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO datasets
                     (name, original_filename, file_path, file_size, rows, cols, columns_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    name,
                    original_filename,
                    file_path,
                    file_size,
                    rows,
                    cols,
                    columns_json,
                    crate::now_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Delete the row and its backing file. Returns the dataset name.
    pub fn delete(&self, dataset_id: i64) -> Result<String> {
        let (name, file_path) = self.db.transaction(|tx| {
            let row = tx
                .query_row(
                    "SELECT name, file_path FROM datasets WHERE id = ?1",
                    params![dataset_id],
                    |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
                )
                .optional()
                .map_err(db_err)?;
            let Some((name, file_path)) = row else {
                return Err(Error::not_found(format!("Dataset {dataset_id} not found")));
            };
            tx.execute("DELETE FROM datasets WHERE id = ?1", params![dataset_id])
                .map_err(db_err)?;
            Ok((name, file_path))
        })?;

        let path = std::path::Path::new(&file_path);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(name)
    }

    pub fn get_file_path(&self, dataset_id: i64) -> Result<String> {
        let path = self.db.transaction(|tx| {
            tx.query_row(
                "SELECT file_path FROM datasets WHERE id = ?1",
                params![dataset_id],
                |r| r.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)
        })?;
        path.ok_or_else(|| Error::not_found(format!("Dataset {dataset_id} not found")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::init_admin_db;

    fn repo(dir: &tempfile::TempDir) -> DatasetRepo {
        let db = Database::new(dir.path().join("admin.db"));
        init_admin_db(&db).unwrap();
        DatasetRepo::new(db)
    }

    fn columns() -> Vec<ColumnInfo> {
        vec![ColumnInfo {
            name: "amount".to_string(),
            dtype: "float".to_string(),
            non_null: 100,
            null_count: 0,
            unique: 87,
        }]
    }

    #[test]
    fn test_create_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let id = repo
            .create("txns", "txns.csv", "/tmp/up/txns.csv", 1024, 100, 5, &columns())
            .unwrap();
        assert!(id > 0);

        let found = repo.find_by_id(id).unwrap();
        assert_eq!(found.name, "txns");
        assert_eq!(found.rows, 100);
        assert_eq!(found.columns.len(), 1);
        assert_eq!(found.columns[0].name, "amount");
    }

    #[test]
    fn test_find_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        assert!(matches!(repo.find_by_id(99), Err(Error::NotFound(_))));
        assert!(matches!(repo.get_file_path(99), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_file_path_unique() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.create("a", "a.csv", "/tmp/same.csv", 1, 1, 1, &[]).unwrap();
        assert!(repo.create("b", "b.csv", "/tmp/same.csv", 1, 1, 1, &[]).is_err());
    }

    #[test]
    fn test_delete_removes_row_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let file = dir.path().join("data.csv");
        std::fs::write(&file, "a,b\n1,2\n").unwrap();
        let id = repo
            .create("data", "data.csv", file.to_str().unwrap(), 8, 1, 2, &[])
            .unwrap();

        let name = repo.delete(id).unwrap();
        assert_eq!(name, "data");
        assert!(!file.exists());
        assert!(matches!(repo.find_by_id(id), Err(Error::NotFound(_))));
        // Double delete reports NotFound.
        assert!(matches!(repo.delete(id), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_find_by_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        let id = repo.create("x", "x.csv", "/tmp/x.csv", 1, 1, 1, &[]).unwrap();
        assert_eq!(repo.find_by_file_path("/tmp/x.csv").unwrap(), Some(id));
        assert_eq!(repo.find_by_file_path("/tmp/other.csv").unwrap(), None);
    }

    #[test]
    fn test_list_orders_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.create("one", "1.csv", "/tmp/1.csv", 1, 1, 1, &[]).unwrap();
        repo.create("two", "2.csv", "/tmp/2.csv", 1, 1, 1, &[]).unwrap();
        let all = repo.list_all().unwrap();
        assert_eq!(all.len(), 2);
    }
}
