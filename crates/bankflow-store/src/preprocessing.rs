//! Repository for the preprocessing results database.
//!
//! Written by the report-generation subtask; mirrored as JSON artifacts
//! under `preprocessing_output/<use_case_key>/`.

use bankflow::Result;
use rusqlite::params;

use crate::db::{db_err, Database};
use crate::models::ColumnInfo;

#[derive(Clone)]
pub struct PreprocessingRepo {
    db: Database,
}

impl PreprocessingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record one preprocessing run with its column profiles; returns the
    /// run id.
    pub fn record_run(
        &self,
        use_case_key: &str,
        label: &str,
        data_quality_score: f64,
        total_rows: i64,
        total_columns: i64,
        elapsed_seconds: f64,
        profiles: &[ColumnInfo],
    ) -> Result<i64> {
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO preprocessing_runs
                     (use_case_key, label, data_quality_score, total_rows, total_columns,
                      run_timestamp, elapsed_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    use_case_key,
                    label,
                    data_quality_score,
                    total_rows,
                    total_columns,
                    crate::now_rfc3339(),
                    elapsed_seconds,
                ],
            )
            .map_err(db_err)?;
            let run_id = tx.last_insert_rowid();

            for profile in profiles {
                tx.execute(
                    "INSERT INTO column_profiles
                         (run_id, column_name, dtype, non_null, null_count, unique_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        run_id,
                        profile.name,
                        profile.dtype,
                        profile.non_null,
                        profile.null_count,
                        profile.unique,
                    ],
                )
                .map_err(db_err)?;
            }
            Ok(run_id)
        })
    }

    /// Latest recorded quality score for a use case.
    pub fn latest_quality_score(&self, use_case_key: &str) -> Result<Option<f64>> {
        self.db.transaction(|tx| {
            use rusqlite::OptionalExtension;
            tx.query_row(
                "SELECT data_quality_score FROM preprocessing_runs
                 WHERE use_case_key = ?1 ORDER BY id DESC LIMIT 1",
                params![use_case_key],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schema::init_preprocessing_db;

    #[test]
    fn test_record_run_with_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("pre.db"));
        init_preprocessing_db(&db).unwrap();
        let repo = PreprocessingRepo::new(db);

        let profiles = vec![ColumnInfo {
            name: "amount".to_string(),
            dtype: "float".to_string(),
            non_null: 990,
            null_count: 10,
            unique: 800,
        }];
        let run_id = repo
            .record_run("uc_fr_01", "Fraud Management", 92.5, 1000, 12, 3.2, &profiles)
            .unwrap();
        assert!(run_id > 0);
        assert_eq!(repo.latest_quality_score("uc_fr_01").unwrap(), Some(92.5));
        assert_eq!(repo.latest_quality_score("uc_other").unwrap(), None);
    }

    #[test]
    fn test_latest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("pre.db"));
        init_preprocessing_db(&db).unwrap();
        let repo = PreprocessingRepo::new(db);
        repo.record_run("uc_x", "X", 70.0, 10, 2, 0.1, &[]).unwrap();
        repo.record_run("uc_x", "X", 85.0, 10, 2, 0.1, &[]).unwrap();
        assert_eq!(repo.latest_quality_score("uc_x").unwrap(), Some(85.0));
    }
}
