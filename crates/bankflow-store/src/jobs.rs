//! Repository for the `jobs` table.
//!
//! Invariants enforced here: status advances monotonically (queued →
//! running → terminal), `progress = 100` iff completed, `completed_at` is
//! stamped exactly when a terminal state is reached, and `cancel` refuses
//! anything already terminal.

use bankflow::{Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use crate::db::{db_err, Database};
use crate::models::{Job, JobState};
use crate::now_rfc3339;

#[derive(Clone)]
pub struct JobRepo {
    db: Database,
}

fn job_from_row(r: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = r.get(2)?;
    let config_json: String = r.get(4)?;
    let result_json: String = r.get(5)?;
    Ok(Job {
        id: r.get(0)?,
        job_type: r.get(1)?,
        status: JobState::parse(&status).unwrap_or(JobState::Failed),
        progress: r.get(3)?,
        config: serde_json::from_str(&config_json).unwrap_or(Value::Null),
        result: serde_json::from_str(&result_json).unwrap_or(Value::Null),
        error_message: r.get(6)?,
        started_at: r.get(7)?,
        completed_at: r.get(8)?,
        created_at: r.get(9)?,
    })
}

const JOB_COLUMNS: &str = "id, job_type, status, progress, config_json, result_json, \
                           error_message, started_at, completed_at, created_at";

impl JobRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn list_all(&self, limit: usize) -> Result<Vec<Job>> {
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], job_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    pub fn list_by_type(&self, job_type: &str) -> Result<Vec<Job>> {
        self.db.transaction(|tx| {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE job_type = ?1
                     ORDER BY created_at DESC, id DESC"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![job_type], job_from_row)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    pub fn find_by_id(&self, job_id: i64) -> Result<Job> {
        let job = self.db.transaction(|tx| {
            tx.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
                job_from_row,
            )
            .optional()
            .map_err(db_err)
        })?;
        job.ok_or_else(|| Error::not_found(format!("Job {job_id} not found")))
    }

    /// Create a queued job; returns the new id.
    pub fn create(&self, job_type: &str, config: &Value) -> Result<i64> {
        let config_json = serde_json::to_string(config)?;
        self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO jobs (job_type, status, progress, config_json, created_at)
                 VALUES (?1, 'queued', 0, ?2, ?3)",
                params![job_type, config_json, now_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Advance the status, stamping started_at/completed_at as appropriate.
    pub fn update_status(
        &self,
        job_id: i64,
        status: JobState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = now_rfc3339();
        let affected = self.db.transaction(|tx| {
            let n = match status {
                JobState::Running => tx
                    .execute(
                        "UPDATE jobs SET status = ?1, started_at = ?2 WHERE id = ?3",
                        params![status.as_str(), now, job_id],
                    )
                    .map_err(db_err)?,
                s if s.is_terminal() => tx
                    .execute(
                        "UPDATE jobs SET status = ?1, error_message = COALESCE(?2, error_message),
                                completed_at = ?3 WHERE id = ?4",
                        params![status.as_str(), error_message, now, job_id],
                    )
                    .map_err(db_err)?,
                _ => tx
                    .execute(
                        "UPDATE jobs SET status = ?1 WHERE id = ?2",
                        params![status.as_str(), job_id],
                    )
                    .map_err(db_err)?,
            };
            Ok(n)
        })?;
        if affected == 0 {
            return Err(Error::not_found(format!("Job {job_id} not found")));
        }
        Ok(())
    }

    pub fn update_progress(&self, job_id: i64, progress: i64) -> Result<()> {
        let progress = progress.clamp(0, 100);
        let affected = self.db.transaction(|tx| {
            tx.execute(
                "UPDATE jobs SET progress = ?1 WHERE id = ?2",
                params![progress, job_id],
            )
            .map_err(db_err)
        })?;
        if affected == 0 {
            return Err(Error::not_found(format!("Job {job_id} not found")));
        }
        Ok(())
    }

    /// Record the result and mark the job completed (progress 100).
    pub fn update_result(&self, job_id: i64, result: &Value) -> Result<()> {
        let result_json = serde_json::to_string(result)?;
        let affected = self.db.transaction(|tx| {
            tx.execute(
                "UPDATE jobs SET status = 'completed', progress = 100, result_json = ?1,
                        completed_at = ?2 WHERE id = ?3",
                params![result_json, now_rfc3339(), job_id],
            )
            .map_err(db_err)
        })?;
        if affected == 0 {
            return Err(Error::not_found(format!("Job {job_id} not found")));
        }
        Ok(())
    }

    /// Cancel a queued or running job.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `Validation` for jobs already terminal.
    pub fn cancel(&self, job_id: i64) -> Result<()> {
        self.db.transaction(|tx| {
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM jobs WHERE id = ?1",
                    params![job_id],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let Some(status) = status else {
                return Err(Error::not_found(format!("Job {job_id} not found")));
            };
            let state = JobState::parse(&status)?;
            if state.is_terminal() {
                return Err(Error::validation(format!(
                    "Cannot cancel job in '{status}' state"
                )));
            }
            tx.execute(
                "UPDATE jobs SET status = 'cancelled', completed_at = ?1 WHERE id = ?2",
                params![now_rfc3339(), job_id],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    /// Mark `running` jobs older than `grace_secs` as failed/"orphaned".
    /// Run at startup; abrupt kills leave rows behind.
    pub fn reconcile_orphans(&self, grace_secs: i64) -> Result<usize> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(grace_secs)).to_rfc3339();
        self.db.transaction(|tx| {
            tx.execute(
                "UPDATE jobs SET status = 'failed', error_message = 'orphaned', completed_at = ?1
                 WHERE status = 'running' AND COALESCE(started_at, created_at) < ?2",
                params![now_rfc3339(), cutoff],
            )
            .map_err(db_err)
        })
    }
}
