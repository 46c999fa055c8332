//! SQLite repositories for BankFlow.
//!
//! Every repository shares one transactional connect primitive
//! ([`Database::transaction`]): open a fresh connection, set
//! `journal_mode=WAL` and `foreign_keys=ON`, run the closure inside a
//! transaction, commit on success, roll back on error, close. Repositories
//! exclusively own their rows; callers receive values, never references.
//!
//! Schema initialization is idempotent (`CREATE TABLE IF NOT EXISTS`) and
//! runs at server startup via [`init_admin_db`], [`init_results_db`], and
//! [`init_preprocessing_db`].
//!
//! Everything here is synchronous; async callers bridge through
//! `tokio::task::spawn_blocking`.

mod alerts;
mod audit;
mod datasets;
mod db;
mod integrations;
mod jobs;
mod models;
mod preprocessing;
mod results;
mod schema;
mod text2sql;

pub use alerts::{AlertRepo, AlertUpdate};
pub use audit::AuditRepo;
pub use datasets::DatasetRepo;
pub use db::Database;
pub use integrations::{Integration, IntegrationRepo, INTEGRATION_DEFS};
pub use jobs::JobRepo;
pub use models::{
    Alert, AuditEntry, ColumnInfo, Dataset, DatasetSummary, Job, JobState, SubtaskRun,
    SubtaskState, UseCaseStatus,
};
pub use preprocessing::PreprocessingRepo;
pub use results::ResultsRepo;
pub use schema::{init_admin_db, init_preprocessing_db, init_results_db};
pub use text2sql::{Text2SqlEntry, Text2SqlRepo};

/// Current UTC timestamp in RFC 3339.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
