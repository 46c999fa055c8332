//! Repository for the pipeline results database.
//!
//! `subtask_runs` is the scheduler's source of truth for idempotent resume:
//! every subtask transition is one transaction here. Artifacts on disk are
//! a cache; this table is the record.

use bankflow::Result;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::{db_err, Database};
use crate::models::{SubtaskRun, SubtaskState, UseCaseStatus};
use crate::now_rfc3339;

#[derive(Clone)]
pub struct ResultsRepo {
    db: Database,
}

impl ResultsRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert the per-use-case pipeline status.
    pub fn set_use_case_status(&self, use_case_key: &str, status: &str) -> Result<()> {
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO job_status (use_case_key, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(use_case_key)
                 DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
                params![use_case_key, status, now_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn list_use_case_statuses(&self) -> Result<Vec<UseCaseStatus>> {
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(
                    "SELECT use_case_key, status, created_at, updated_at
                     FROM job_status ORDER BY updated_at DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| {
                    Ok(UseCaseStatus {
                        use_case_key: r.get(0)?,
                        status: r.get(1)?,
                        created_at: r.get(2)?,
                        updated_at: r.get(3)?,
                    })
                })
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    /// Record a subtask entering the running state.
    pub fn subtask_started(&self, use_case_key: &str, subtask: &str) -> Result<()> {
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO subtask_runs (use_case_key, subtask, status, started_at)
                 VALUES (?1, ?2, 'running', ?3)
                 ON CONFLICT(use_case_key, subtask)
                 DO UPDATE SET status = 'running', started_at = excluded.started_at,
                               error = NULL, completed_at = NULL",
                params![use_case_key, subtask, now_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Record a subtask outcome in a single transaction.
    pub fn subtask_finished(
        &self,
        use_case_key: &str,
        subtask: &str,
        status: SubtaskState,
        input_hash: Option<&str>,
        artifacts: &[String],
        metrics: Option<&Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let artifacts_json = serde_json::to_string(artifacts)?;
        let metrics_json = metrics.map(serde_json::to_string).transpose()?;
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO subtask_runs
                     (use_case_key, subtask, status, input_hash, artifacts_json, metrics_json, error, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(use_case_key, subtask)
                 DO UPDATE SET status = excluded.status,
                               input_hash = COALESCE(excluded.input_hash, subtask_runs.input_hash),
                               artifacts_json = excluded.artifacts_json,
                               metrics_json = excluded.metrics_json,
                               error = excluded.error,
                               completed_at = excluded.completed_at",
                params![
                    use_case_key,
                    subtask,
                    status.as_str(),
                    input_hash,
                    artifacts_json,
                    metrics_json,
                    error,
                    now_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// The recorded run for one (use case, subtask), if any.
    pub fn get_subtask_run(&self, use_case_key: &str, subtask: &str) -> Result<Option<SubtaskRun>> {
        self.db.transaction(|tx| {
            tx.query_row(
                "SELECT use_case_key, subtask, status, input_hash, artifacts_json,
                        metrics_json, error, started_at, completed_at
                 FROM subtask_runs WHERE use_case_key = ?1 AND subtask = ?2",
                params![use_case_key, subtask],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, Option<String>>(5)?,
                        r.get::<_, Option<String>>(6)?,
                        r.get::<_, Option<String>>(7)?,
                        r.get::<_, Option<String>>(8)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)
        })
        .map(|row| {
            row.map(
                |(use_case_key, subtask, status, input_hash, artifacts_json, metrics_json, error, started_at, completed_at)| {
                    SubtaskRun {
                        use_case_key,
                        subtask,
                        status: SubtaskState::parse(&status).unwrap_or(SubtaskState::Fail),
                        input_hash,
                        artifacts: serde_json::from_str(&artifacts_json).unwrap_or_default(),
                        metrics: metrics_json.and_then(|m| serde_json::from_str(&m).ok()),
                        error,
                        started_at,
                        completed_at,
                    }
                },
            )
        })
    }

    /// All recorded runs for one use case, in no particular order.
    pub fn list_subtask_runs(&self, use_case_key: &str) -> Result<Vec<SubtaskRun>> {
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(
                    "SELECT subtask FROM subtask_runs WHERE use_case_key = ?1 ORDER BY id",
                )
                .map_err(db_err)?;
            let names = stmt
                .query_map(params![use_case_key], |r| r.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(names)
        })
        .and_then(|names| {
            names
                .into_iter()
                .filter_map(|name| self.get_subtask_run(use_case_key, &name).transpose())
                .collect()
        })
    }

    /// Upsert one governance dimension score.
    pub fn set_governance_score(&self, use_case_key: &str, dimension: &str, score: f64) -> Result<()> {
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO governance_scores (use_case_key, dimension, score, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(use_case_key, dimension)
                 DO UPDATE SET score = excluded.score, created_at = excluded.created_at",
                params![use_case_key, dimension, score, now_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Governance scores for one use case as (dimension, score) pairs.
    pub fn governance_scores(&self, use_case_key: &str) -> Result<Vec<(String, f64)>> {
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(
                    "SELECT dimension, score FROM governance_scores
                     WHERE use_case_key = ?1 ORDER BY dimension",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![use_case_key], |r| {
                    Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
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
    use crate::schema::init_results_db;
    use serde_json::json;

    fn repo(dir: &tempfile::TempDir) -> ResultsRepo {
        let db = Database::new(dir.path().join("results.db"));
        init_results_db(&db).unwrap();
        ResultsRepo::new(db)
    }

    #[test]
    fn test_use_case_status_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.set_use_case_status("uc_fr_01", "running").unwrap();
        repo.set_use_case_status("uc_fr_01", "completed").unwrap();
        let statuses = repo.list_use_case_statuses().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, "completed");
    }

    #[test]
    fn test_subtask_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);

        repo.subtask_started("uc_fr_01", "data_split").unwrap();
        let run = repo.get_subtask_run("uc_fr_01", "data_split").unwrap().unwrap();
        assert_eq!(run.status, SubtaskState::Running);
        assert!(run.started_at.is_some());
        assert!(run.completed_at.is_none());

        repo.subtask_finished(
            "uc_fr_01",
            "data_split",
            SubtaskState::Ok,
            Some("abc123"),
            &["splits/train.csv".to_string()],
            Some(&json!({"rows": 700})),
            None,
        )
        .unwrap();

        let run = repo.get_subtask_run("uc_fr_01", "data_split").unwrap().unwrap();
        assert_eq!(run.status, SubtaskState::Ok);
        assert_eq!(run.input_hash.as_deref(), Some("abc123"));
        assert_eq!(run.artifacts, vec!["splits/train.csv"]);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_failure_then_rerun_clears_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.subtask_finished(
            "uc_cr_02",
            "model_training",
            SubtaskState::Fail,
            None,
            &[],
            None,
            Some("timeout"),
        )
        .unwrap();
        let run = repo.get_subtask_run("uc_cr_02", "model_training").unwrap().unwrap();
        assert_eq!(run.error.as_deref(), Some("timeout"));

        repo.subtask_started("uc_cr_02", "model_training").unwrap();
        let run = repo.get_subtask_run("uc_cr_02", "model_training").unwrap().unwrap();
        assert_eq!(run.status, SubtaskState::Running);
        assert!(run.error.is_none());
    }

    #[test]
    fn test_governance_scores() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.set_governance_score("uc_fr_01", "explainability", 0.8).unwrap();
        repo.set_governance_score("uc_fr_01", "explainability", 0.9).unwrap();
        repo.set_governance_score("uc_fr_01", "fairness", 0.7).unwrap();
        let scores = repo.governance_scores("uc_fr_01").unwrap();
        assert_eq!(scores.len(), 2);
        assert!((scores[0].1 - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_list_subtask_runs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repo(&dir);
        repo.subtask_started("uc_a", "data_split").unwrap();
        repo.subtask_started("uc_a", "noise_removal").unwrap();
        repo.subtask_started("uc_b", "data_split").unwrap();
        assert_eq!(repo.list_subtask_runs("uc_a").unwrap().len(), 2);
        assert_eq!(repo.list_subtask_runs("uc_b").unwrap().len(), 1);
    }
}
