//! Typed rows returned by the repositories.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use bankflow::{Error, Result};

pub use bankflow::core::tabular::ColumnInfo;

/// Dataset listing row (no column details).
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub id: i64,
    pub name: String,
    pub filename: String,
    pub size: i64,
    pub rows: i64,
    pub cols: i64,
    pub created_at: String,
}

/// Full dataset row.
#[derive(Debug, Clone, Serialize)]
pub struct Dataset {
    pub id: i64,
    pub name: String,
    pub filename: String,
    pub file_path: String,
    pub size: i64,
    pub rows: i64,
    pub cols: i64,
    pub columns: Vec<ColumnInfo>,
    pub created_at: String,
}

/// Job lifecycle states. Status advances monotonically through
/// queued → running → one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::data(format!("Unknown job status: '{other}'"))),
        }
    }

    /// Whether this state ends the lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Job row.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    pub status: JobState,
    pub progress: i64,
    pub config: Value,
    pub result: Value,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// Alert rule row.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: i64,
    pub name: String,
    pub metric: String,
    pub threshold: f64,
    pub operator: String,
    pub uc_id: String,
    pub severity: String,
    pub enabled: bool,
    pub last_triggered: Option<String>,
    pub created_at: Option<String>,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub detail: String,
    pub user: String,
    pub entry_type: String,
    pub created_at: String,
}

/// Per-use-case pipeline status (results DB).
#[derive(Debug, Clone, Serialize)]
pub struct UseCaseStatus {
    pub use_case_key: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Subtask outcome states recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskState {
    Running,
    Ok,
    Skip,
    Fail,
}

impl SubtaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Ok => "ok",
            Self::Skip => "skip",
            Self::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "ok" => Ok(Self::Ok),
            "skip" => Ok(Self::Skip),
            "fail" => Ok(Self::Fail),
            other => Err(Error::data(format!("Unknown subtask status: '{other}'"))),
        }
    }

    /// Ok and Skip both satisfy the predecessor requirement.
    pub fn succeeded(self) -> bool {
        matches!(self, Self::Ok | Self::Skip)
    }
}

/// Recorded subtask transition (results DB): the scheduler's source of
/// truth for idempotent resume.
#[derive(Debug, Clone, Serialize)]
pub struct SubtaskRun {
    pub use_case_key: String,
    pub subtask: String,
    pub status: SubtaskState,
    pub input_hash: Option<String>,
    pub artifacts: Vec<String>,
    pub metrics: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_round_trip() {
        for s in [
            JobState::Queued,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Cancelled,
        ] {
            assert_eq!(JobState::parse(s.as_str()).unwrap(), s);
        }
        assert!(JobState::parse("paused").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_subtask_succeeded() {
        assert!(SubtaskState::Ok.succeeded());
        assert!(SubtaskState::Skip.succeeded());
        assert!(!SubtaskState::Fail.succeeded());
        assert!(!SubtaskState::Running.succeeded());
    }
}
