//! Idempotent schema initialization, run at server startup.

use bankflow::Result;
use tracing::info;

use crate::db::{db_err, Database};

const ADMIN_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS datasets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    file_path TEXT NOT NULL UNIQUE,
    file_size INTEGER NOT NULL,
    rows INTEGER NOT NULL DEFAULT 0,
    cols INTEGER NOT NULL DEFAULT 0,
    columns_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    progress INTEGER NOT NULL DEFAULT 0,
    config_json TEXT NOT NULL DEFAULT '{}',
    result_json TEXT NOT NULL DEFAULT '{}',
    error_message TEXT,
    started_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    metric TEXT NOT NULL,
    threshold REAL NOT NULL,
    operator TEXT NOT NULL DEFAULT '>',
    uc_id TEXT NOT NULL DEFAULT 'all',
    severity TEXT NOT NULL DEFAULT 'warning',
    enabled INTEGER NOT NULL DEFAULT 1,
    last_triggered TEXT,
    created_at TEXT
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    detail TEXT,
    user TEXT NOT NULL DEFAULT 'system',
    entry_type TEXT NOT NULL DEFAULT 'info',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS integrations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    config_json TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'disconnected',
    last_sync TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS text2sql_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    natural_language TEXT NOT NULL,
    generated_sql TEXT,
    executed INTEGER NOT NULL DEFAULT 0,
    row_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
";

const RESULTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS job_status (
    use_case_key TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS subtask_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    use_case_key TEXT NOT NULL,
    subtask TEXT NOT NULL,
    status TEXT NOT NULL,
    input_hash TEXT,
    artifacts_json TEXT NOT NULL DEFAULT '[]',
    metrics_json TEXT,
    error TEXT,
    started_at TEXT,
    completed_at TEXT,
    UNIQUE(use_case_key, subtask)
);

CREATE TABLE IF NOT EXISTS governance_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    use_case_key TEXT NOT NULL,
    dimension TEXT NOT NULL,
    score REAL NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(use_case_key, dimension)
);
";

const PREPROCESSING_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS preprocessing_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    use_case_key TEXT NOT NULL,
    label TEXT,
    data_quality_score REAL,
    total_rows INTEGER,
    total_columns INTEGER,
    run_timestamp TEXT NOT NULL,
    elapsed_seconds REAL
);

CREATE TABLE IF NOT EXISTS column_profiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    column_name TEXT NOT NULL,
    dtype TEXT,
    non_null INTEGER,
    null_count INTEGER,
    unique_count INTEGER,
    FOREIGN KEY(run_id) REFERENCES preprocessing_runs(id)
);
CREATE INDEX IF NOT EXISTS idx_profiles_run ON column_profiles(run_id);
";

fn init(db: &Database, schema: &str, label: &str) -> Result<()> {
    db.transaction(|tx| tx.execute_batch(schema).map_err(db_err))?;
    info!(path = %db.path().display(), "{label} database initialized");
    Ok(())
}

/// Create the admin tables (datasets, jobs, alerts, audit_log,
/// integrations, text2sql_history).
pub fn init_admin_db(db: &Database) -> Result<()> {
    init(db, ADMIN_SCHEMA, "Admin")
}

/// Create the pipeline results tables.
pub fn init_results_db(db: &Database) -> Result<()> {
    init(db, RESULTS_SCHEMA, "Results")
}

/// Create the preprocessing results tables.
pub fn init_preprocessing_db(db: &Database) -> Result<()> {
    init(db, PREPROCESSING_SCHEMA, "Preprocessing")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("admin.db"));
        init_admin_db(&db).unwrap();
        init_admin_db(&db).unwrap();

        let tables: i64 = db
            .transaction(|tx| {
                tx.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN
                     ('datasets','jobs','alerts','audit_log','integrations','text2sql_history')",
                    [],
                    |r| r.get(0),
                )
                .map_err(db_err)
            })
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn test_results_and_preprocessing_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let results = Database::new(dir.path().join("results.db"));
        init_results_db(&results).unwrap();
        let pre = Database::new(dir.path().join("pre.db"));
        init_preprocessing_db(&pre).unwrap();
    }
}
